//! Map surface: ties the viewport, tile cache, loader and overlays together.
//!
//! The surface lives on the UI thread. Tile batches and history fetches
//! complete on background threads and come back through one event channel
//! that [`MapSurface::poll`] drains once per frame.

pub mod cache;
pub mod camera;
pub mod geolocation;
pub mod history;
pub mod input;
pub mod loader;
pub mod overlay;
pub mod quadtree;
pub mod tile;

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};
use image::RgbaImage;

use crate::config::MapConfig;
use crate::error::{FetchError, MapError, Result};
use cache::{CacheStats, Composite, TileCache};
use camera::{Viewport, ViewportController, ZoomDirection};
use geolocation::{GeoLocationContext, ObjectId, Subscription};
use history::{HistorySource, HistoryTrack, HistoryWindow};
use input::{GestureTracker, InputEvent, MouseButton};
use loader::{BatchReport, TileLoader, TileSource};
use overlay::{
    info_text, ObjectMarkers, Overlay, OverlayPrimitive, RenderSink, ScreenRect, ZoomControl,
    SELECTION_COLOR,
};
use tile::{GeoPoint, TileSet};

/// Results produced off the UI thread
#[derive(Debug)]
pub enum MapEvent {
    TilesReady(BatchReport),
    History {
        request: u64,
        result: std::result::Result<Vec<GeoPoint>, FetchError>,
    },
}

/// Notified after a committed zoom or pan
pub trait MapListener {
    fn on_zoom(&self, _zoom: u8) {}
    fn on_pan(&self, _center: GeoPoint) {}
}

struct MarkerLayer {
    markers: ObjectMarkers,
    subscription: Subscription,
}

struct HistoryLayer {
    track: HistoryTrack,
    source: Arc<dyn HistorySource>,
}

pub struct MapSurface {
    controller: ViewportController,
    cache: Arc<TileCache>,
    loader: TileLoader,
    tracker: GestureTracker,
    events_tx: Sender<MapEvent>,
    events_rx: Receiver<MapEvent>,
    tile_set: Option<TileSet>,
    composite: Option<Composite>,
    listeners: Vec<Box<dyn MapListener>>,
    markers: Option<MarkerLayer>,
    history: Option<HistoryLayer>,
    history_minutes: i64,
    title: Option<String>,
    controls_enabled: bool,
    hover_radius: i32,
    dirty: bool,
}

impl MapSurface {
    /// Create a surface showing `center` at `zoom` and start loading its tiles
    pub fn new(
        config: &MapConfig,
        source: Arc<dyn TileSource>,
        center: GeoPoint,
        zoom: u8,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        config.validate()?;
        let controller = ViewportController::new(center, zoom, width, height)?
            .with_zoom_range(config.zoom.min, config.zoom.max)?
            .with_jitter(config.drag_jitter_px);
        let cache = Arc::new(TileCache::new(
            config.cache.max_tiles,
            config.cache_memory_bytes(),
        ));
        let loader = TileLoader::new(Arc::clone(&cache), source, config.workers);
        let (events_tx, events_rx) = mpsc::channel();

        let mut surface = Self {
            controller,
            cache,
            loader,
            tracker: GestureTracker::new(config.drag_jitter_px),
            events_tx,
            events_rx,
            tile_set: None,
            composite: None,
            listeners: Vec::new(),
            markers: None,
            history: None,
            history_minutes: config.history_minutes,
            title: None,
            controls_enabled: true,
            hover_radius: config.hover_radius_px,
            dirty: true,
        };
        surface.reload()?;
        Ok(surface)
    }

    pub fn viewport(&self) -> &Viewport {
        self.controller.viewport()
    }

    pub fn generation(&self) -> u64 {
        self.controller.generation()
    }

    /// Tile set requested for the current viewport, with what was missing
    pub fn tile_set(&self) -> Option<&TileSet> {
        self.tile_set.as_ref()
    }

    pub fn composite(&self) -> Option<&Composite> {
        self.composite.as_ref()
    }

    /// Current composite; a viewport without area has nothing to show
    pub fn composite_image(&self) -> Result<&RgbaImage> {
        let viewport = self.controller.viewport();
        match &self.composite {
            Some(composite) if viewport.is_valid() => Ok(&composite.image),
            _ => Err(MapError::InvalidViewport {
                width: viewport.width,
                height: viewport.height,
            }),
        }
    }

    pub fn needs_redraw(&self) -> bool {
        self.dirty
    }

    /// Recompute the tile set, composite what is resident and fetch the rest
    pub fn reload(&mut self) -> Result<()> {
        let viewport = *self.controller.viewport();
        let generation = self.controller.generation();
        let tile_set = tile::tile_set_for(&viewport)?.with_generation(generation);
        self.loader.supersede(generation);
        self.cache.pin(tile_set.keys());

        let (composite, missing) = self.cache.request(&tile_set);
        if !missing.missing().is_empty() {
            let tx = self.events_tx.clone();
            self.loader.fetch_missing(missing.clone(), move |report| {
                if tx.send(MapEvent::TilesReady(report)).is_err() {
                    log::debug!("Map surface closed, dropping tile batch");
                }
            });
        }

        self.tile_set = Some(missing);
        self.composite = Some(composite);
        self.dirty = true;
        Ok(())
    }

    /// Reload and notify listeners if the viewport actually changed
    fn commit(&mut self, changed: Option<Viewport>, previous: Viewport) -> Result<bool> {
        let Some(viewport) = changed else {
            return Ok(false);
        };
        self.reload()?;
        if viewport.zoom != previous.zoom {
            for listener in &self.listeners {
                listener.on_zoom(viewport.zoom);
            }
        }
        if viewport.center != previous.center {
            for listener in &self.listeners {
                listener.on_pan(viewport.center);
            }
        }
        Ok(true)
    }

    pub fn show_map(&mut self, center: GeoPoint, zoom: u8) -> Result<()> {
        self.controller.show_map(center, zoom)?;
        self.reload()
    }

    pub fn set_zoom(&mut self, zoom: u8) -> Result<bool> {
        let previous = *self.controller.viewport();
        let changed = self.controller.set_zoom(zoom)?;
        self.commit(changed, previous)
    }

    pub fn zoom_by(&mut self, direction: ZoomDirection) -> Result<bool> {
        let previous = *self.controller.viewport();
        let changed = self.controller.zoom_by(direction)?;
        self.commit(changed, previous)
    }

    pub fn zoom_to_fit(&mut self, a: &GeoPoint, b: &GeoPoint) -> Result<bool> {
        let previous = *self.controller.viewport();
        let changed = self.controller.zoom_to_fit(a, b)?;
        self.commit(changed, previous)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.tracker.cancel();
        self.controller.resize(width, height)?;
        self.reload()
    }

    pub fn location_at(&self, x: i32, y: i32) -> Result<GeoPoint> {
        Ok(self.controller.viewport().location_at(x as f64, y as f64)?)
    }

    /// Feed one input event. Returns true if the surface needs a redraw.
    ///
    /// A gesture that would leave the projection is refused and its error
    /// returned; the viewport stays as it was.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<bool> {
        let viewport = *self.controller.viewport();
        match event {
            InputEvent::Move { x, y } => {
                if self.tracker.motion(x, y) {
                    self.dirty = true;
                    return Ok(true);
                }
                if self.tracker.is_dragging() {
                    return Ok(false);
                }
                Ok(self.update_hover(x, y))
            }
            InputEvent::Exit => {
                self.tracker.leave();
                let cleared = self
                    .history
                    .as_mut()
                    .is_some_and(|layer| layer.track.clear_highlight());
                self.dirty |= cleared;
                Ok(cleared)
            }
            _ if !self.controls_enabled => Ok(false),
            InputEvent::Press {
                x,
                y,
                button: MouseButton::Primary,
                modifiers,
            } => {
                if let Some(direction) = ZoomControl::layout(viewport.width, viewport.height).hit(x, y) {
                    let changed = self.controller.zoom_by(direction)?;
                    return self.commit(changed, viewport);
                }
                let (_, max_zoom) = self.controller.zoom_range();
                self.tracker
                    .press(x, y, modifiers.shift, viewport.zoom < max_zoom);
                Ok(false)
            }
            InputEvent::Release {
                x,
                y,
                button: MouseButton::Primary,
            } => {
                let previewing =
                    self.tracker.drag_offset().is_some() || self.tracker.selection().is_some();
                let Some(stroke) = self.tracker.release(x, y) else {
                    return Ok(false);
                };
                if previewing {
                    self.dirty = true;
                }
                let gesture = self
                    .controller
                    .classify_click(stroke.press, stroke.release, stroke.select);
                let changed = self.controller.apply_gesture(gesture)?;
                Ok(self.commit(changed, viewport)? || previewing)
            }
            InputEvent::Wheel { x, y, count } => {
                let Some(direction) = ZoomDirection::from_wheel(count) else {
                    return Ok(false);
                };
                let changed = self.controller.zoom_at(direction, x as f64, y as f64)?;
                self.commit(changed, viewport)
            }
            InputEvent::DoubleClick {
                x,
                y,
                button: MouseButton::Primary,
                modifiers,
            } => {
                let changed = self
                    .controller
                    .zoom_in_at_location(x as f64, y as f64, modifiers.shift)?;
                self.commit(changed, viewport)
            }
            _ => Ok(false),
        }
    }

    fn update_hover(&mut self, x: i32, y: i32) -> bool {
        let viewport = *self.controller.viewport();
        let radius = self.hover_radius;
        let changed = self
            .history
            .as_mut()
            .is_some_and(|layer| layer.track.hover(&viewport, x, y, radius));
        self.dirty |= changed;
        changed
    }

    /// Highlight and return the history point nearest to a screen position
    pub fn hover(&mut self, x: i32, y: i32) -> Option<GeoPoint> {
        self.update_hover(x, y);
        self.history
            .as_ref()
            .and_then(|layer| layer.track.highlighted())
            .map(|(_, point)| point)
    }

    /// Apply finished background work. Returns true if a redraw is needed.
    pub fn poll(&mut self) -> bool {
        let mut redraw = false;
        while let Ok(event) = self.events_rx.try_recv() {
            redraw |= match event {
                MapEvent::TilesReady(report) => self.apply_tiles(report),
                MapEvent::History { request, result } => self
                    .history
                    .as_mut()
                    .is_some_and(|layer| layer.track.apply(request, result)),
            };
        }
        redraw |= self.poll_locations();
        self.dirty |= redraw;
        redraw
    }

    fn apply_tiles(&mut self, report: BatchReport) -> bool {
        let current = self.controller.generation();
        if report.generation() != current {
            log::debug!(
                "Discarding stale tile batch for generation {} (current {})",
                report.generation(),
                current
            );
            return false;
        }
        let Some(tile_set) = &self.tile_set else {
            return false;
        };
        let (composite, _) = self.cache.request(tile_set);
        self.composite = Some(composite);
        true
    }

    fn poll_locations(&mut self) -> bool {
        let Some(layer) = &self.markers else {
            return false;
        };
        let areas = self.controller.viewport().visible_areas().unwrap_or_default();
        let history_object = self.history.as_ref().map(|h| h.track.object());

        let mut redraw = false;
        let mut refresh_history = false;
        let mut disconnected = false;
        loop {
            match layer.subscription.receiver.try_recv() {
                Ok(change) => {
                    redraw |= areas.iter().any(|(area, _)| change.affects(area));
                    refresh_history |= Some(change.id) == history_object;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if disconnected {
            log::error!("Location updates disconnected, hiding object markers");
            self.markers = None;
            redraw = true;
        }
        if refresh_history {
            self.refresh_history();
        }
        redraw
    }

    /// Draw live markers for the objects in `context`
    pub fn show_objects(&mut self, context: Arc<GeoLocationContext>, filter: Option<String>) {
        self.hide_objects();
        let subscription = context.subscribe();
        let mut markers = ObjectMarkers::new(context);
        markers.set_filter(filter);
        self.markers = Some(MarkerLayer {
            markers,
            subscription,
        });
        self.dirty = true;
    }

    pub fn hide_objects(&mut self) {
        if let Some(layer) = self.markers.take() {
            layer.markers.context().unsubscribe(layer.subscription.id);
            self.dirty = true;
        }
    }

    pub fn set_object_filter(&mut self, filter: Option<String>) {
        if let Some(layer) = self.markers.as_mut() {
            layer.markers.set_filter(filter);
            self.dirty = true;
        }
    }

    /// Show the movement track of `object`, fetched from `source`
    pub fn show_history(&mut self, object: ObjectId, source: Arc<dyn HistorySource>) {
        let window = HistoryWindow::Relative {
            minutes: self.history_minutes,
        };
        self.history = Some(HistoryLayer {
            track: HistoryTrack::new(object, window),
            source,
        });
        self.refresh_history();
    }

    pub fn history_track(&self) -> Option<&HistoryTrack> {
        self.history.as_ref().map(|layer| &layer.track)
    }

    pub fn change_time_period_minutes(&mut self, minutes: i64) {
        if let Some(layer) = self.history.as_mut() {
            layer.track.change_time_period_minutes(minutes);
            self.refresh_history();
        }
    }

    pub fn change_time_period_until(&mut self, until: DateTime<Utc>) {
        if let Some(layer) = self.history.as_mut() {
            layer.track.change_time_period_until(until);
            self.refresh_history();
        }
    }

    /// Fetch history on a background thread; the answer arrives via `poll`
    fn refresh_history(&mut self) {
        let Some(layer) = self.history.as_mut() else {
            return;
        };
        let (request, range) = layer.track.begin_request(Utc::now());
        let object = layer.track.object();
        let source = Arc::clone(&layer.source);
        let tx = self.events_tx.clone();

        let spawned = thread::Builder::new()
            .name("history-fetch".to_string())
            .spawn(move || {
                let result = source.fetch_history(object, range);
                if tx.send(MapEvent::History { request, result }).is_err() {
                    log::debug!("Map surface closed, dropping history result");
                }
            });
        if let Err(e) = spawned {
            log::error!("Cannot start history fetch: {}", e);
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn MapListener>) {
        self.listeners.push(listener);
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
        self.dirty = true;
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Turn the zoom control and every gesture on or off
    pub fn enable_controls(&mut self, enabled: bool) {
        if !enabled {
            self.tracker.cancel();
        }
        self.controls_enabled = enabled;
        self.dirty = true;
    }

    pub fn controls_enabled(&self) -> bool {
        self.controls_enabled
    }

    /// Offset of the composite during a drag preview
    pub fn drag_offset(&self) -> Option<(i32, i32)> {
        self.tracker.drag_offset()
    }

    /// Everything to draw over the composite, in draw order
    pub fn overlays(&self) -> Vec<OverlayPrimitive> {
        let viewport = *self.controller.viewport();
        let mut out = Vec::new();
        if !viewport.is_valid() {
            return out;
        }

        // Content overlays would lag behind a drag preview
        if self.tracker.drag_offset().is_none() {
            if let Some(layer) = &self.markers {
                layer.markers.draw_overlay(&viewport, &mut out);
            }
            if let Some(layer) = &self.history {
                layer.track.draw_overlay(&viewport, &mut out);
            }
        }

        if let Some((a, b)) = self.tracker.selection() {
            out.push(OverlayPrimitive::SelectionRect {
                rect: ScreenRect::from_corners(a, b),
                color: SELECTION_COLOR,
            });
        }

        out.push(OverlayPrimitive::InfoText {
            text: info_text(&viewport),
        });
        if let Some(title) = self.title.as_ref().filter(|t| !t.is_empty()) {
            out.push(OverlayPrimitive::Title {
                text: title.clone(),
            });
        }
        if self.controls_enabled {
            out.push(OverlayPrimitive::ZoomControl {
                rect: ZoomControl::layout(viewport.width, viewport.height).rect,
                zoom: viewport.zoom,
            });
        }
        out
    }

    /// Hand the composite and overlays to the host for drawing
    pub fn render(&mut self, sink: &mut dyn RenderSink) {
        let overlays = self.overlays();
        let offset = self
            .tracker
            .drag_offset()
            .map(|(dx, dy)| (-dx, -dy))
            .unwrap_or((0, 0));
        match &self.composite {
            Some(composite) => sink.present(&composite.image, offset, &overlays),
            None => sink.present(&RgbaImage::new(0, 0), offset, &overlays),
        }
        self.dirty = false;
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Get pending tile count
    pub fn pending_tiles(&self) -> usize {
        self.loader.pending_count()
    }
}

impl Drop for MapSurface {
    fn drop(&mut self) {
        self.hide_objects();
    }
}
