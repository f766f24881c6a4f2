use std::sync::Arc;

use geomap_client::map::input::{InputEvent, Modifiers, MouseButton};
use geomap_client::map::camera::Gesture;
use geomap_client::{MapConfig, MapSurface, ViewportController};

mod common;
use common::{point, settle, GatedSource};

fn press(x: i32, y: i32) -> InputEvent {
    InputEvent::Press {
        x,
        y,
        button: MouseButton::Primary,
        modifiers: Modifiers::NONE,
    }
}

fn release(x: i32, y: i32) -> InputEvent {
    InputEvent::Release {
        x,
        y,
        button: MouseButton::Primary,
    }
}

#[test]
fn stale_batches_never_reach_the_composite() {
    let (source, gate) = GatedSource::new();
    let source = Arc::new(source);
    let mut surface = MapSurface::new(
        &MapConfig::default(),
        source.clone(),
        point(40.0, -75.0),
        10,
        800,
        600,
    )
    .unwrap();
    let first = surface.generation();

    // Paris shares no tiles with Philadelphia at this zoom
    surface.show_map(point(48.85, 2.35), 10).unwrap();
    let second = surface.generation();
    assert!(second > first);

    surface.poll();
    assert_eq!(surface.composite().unwrap().generation, second);

    drop(gate);
    settle(&mut surface);

    let composite = surface.composite().unwrap();
    assert_eq!(composite.generation, second);
    assert_eq!(composite.blank_tiles, 0);

    // Only tiles already in a worker's hands when the view moved were fetched
    let wanted = surface.tile_set().unwrap().keys().len();
    let workers = MapConfig::default().workers;
    assert!(source.fetched() <= wanted + workers);
}

#[test]
fn small_drag_is_a_click() {
    let controller = ViewportController::new(point(40.0, -75.0), 10, 800, 600).unwrap();
    assert_eq!(
        controller.classify_click((100, 100), (103, 102), false),
        Gesture::Click { x: 103, y: 102 }
    );

    let (source, gate) = GatedSource::new();
    drop(gate);
    let mut surface = MapSurface::new(
        &MapConfig::default(),
        Arc::new(source),
        point(40.0, -75.0),
        10,
        800,
        600,
    )
    .unwrap();
    let before = *surface.viewport();
    let generation = surface.generation();

    surface.handle_input(press(100, 100)).unwrap();
    surface.handle_input(InputEvent::Move { x: 103, y: 97 }).unwrap();
    assert!(!surface.handle_input(release(103, 97)).unwrap());

    assert_eq!(*surface.viewport(), before);
    assert_eq!(surface.generation(), generation);
}

#[test]
fn drag_past_jitter_pans() {
    let (source, gate) = GatedSource::new();
    drop(gate);
    let mut surface = MapSurface::new(
        &MapConfig::default(),
        Arc::new(source),
        point(40.0, -75.0),
        10,
        800,
        600,
    )
    .unwrap();
    let before = surface.viewport().center;

    surface.handle_input(press(400, 300)).unwrap();
    surface.handle_input(InputEvent::Move { x: 300, y: 300 }).unwrap();
    assert_eq!(surface.drag_offset(), Some((100, 0)));
    assert!(surface.handle_input(release(300, 300)).unwrap());

    let after = surface.viewport().center;
    assert!(after.longitude() > before.longitude());
    assert!((after.latitude() - before.latitude()).abs() < 1e-9);
    settle(&mut surface);
    assert_eq!(surface.composite().unwrap().blank_tiles, 0);
}

#[test]
fn view_larger_than_cache_bound_still_completes() {
    let mut config = MapConfig::default();
    config.cache.max_tiles = 4;
    let (source, gate) = GatedSource::new();
    drop(gate);
    let mut surface =
        MapSurface::new(&config, Arc::new(source), point(40.0, -75.0), 10, 800, 600).unwrap();

    settle(&mut surface);
    let composite = surface.composite().unwrap();
    assert_eq!(composite.blank_tiles, 0);
    assert!(surface.cache_stats().tile_count > config.cache.max_tiles);
}
