use geomap_client::map::tile::{self, MAX_LATITUDE, MAX_ZOOM, MIN_ZOOM};
use geomap_client::{GeoPoint, Viewport, ViewportController};
use proptest::prelude::*;

mod common;
use common::point;

fn fits(center: &GeoPoint, zoom: u8, a: &GeoPoint, b: &GeoPoint) -> bool {
    let area = Viewport::new(*center, zoom, 800, 600).coverage().unwrap();
    area.contains_point(a) && area.contains_point(b)
}

proptest! {
    #[test]
    fn pixel_round_trip_stays_within_tolerance(
        lat in -MAX_LATITUDE..MAX_LATITUDE,
        lon in -180.0f64..=180.0,
        zoom in MIN_ZOOM..=MAX_ZOOM,
    ) {
        let p = point(lat, lon);
        let (x, y) = tile::geo_to_pixel(&p, zoom).unwrap();
        let back = tile::pixel_to_geo(x, y, zoom).unwrap();
        prop_assert!((back.latitude() - lat).abs() < 1e-6);
        prop_assert!((back.longitude() - lon).abs() < 1e-6);
    }

    #[test]
    fn tile_set_covers_every_visible_pixel(
        lat in -80.0f64..80.0,
        lon in -180.0f64..=180.0,
        zoom in MIN_ZOOM..=MAX_ZOOM,
        width in 1u32..1200,
        height in 1u32..900,
    ) {
        let viewport = Viewport::new(point(lat, lon), zoom, width, height);
        let tile_set = tile::tile_set_for(&viewport).unwrap();
        let (origin_x, origin_y) = viewport.origin_pixel().unwrap();
        let world = tile::world_size(zoom);
        let n = 1_i64 << zoom;

        let step_x = (width / 16).max(1);
        let step_y = (height / 16).max(1);
        let xs = (0..width).step_by(step_x as usize).chain([width - 1]);
        for sx in xs {
            let ys = (0..height).step_by(step_y as usize).chain([height - 1]);
            for sy in ys {
                let gx = (origin_x + sx as f64 + 0.5).rem_euclid(world);
                let gy = origin_y + sy as f64 + 0.5;
                if gy < 0.0 || gy >= world {
                    continue;
                }
                let geo = tile::pixel_to_geo(gx, gy, zoom).unwrap();
                let (px, py) = tile::geo_to_pixel(&geo, zoom).unwrap();
                let key = tile::tile_for_pixel(px, py, zoom);
                let key = geomap_client::TileKey::new(zoom, key.x.rem_euclid(n), key.y);
                prop_assert!(tile_set.contains(&key), "pixel ({}, {}) maps to {:?}", sx, sy, key);
            }
        }
    }

    #[test]
    fn fit_zoom_is_the_deepest_level_showing_both(
        lat_a in -70.0f64..70.0,
        lon_a in -170.0f64..170.0,
        lat_b in -70.0f64..70.0,
        lon_b in -170.0f64..170.0,
        start in MIN_ZOOM..=MAX_ZOOM,
    ) {
        let (a, b) = (point(lat_a, lon_a), point(lat_b, lon_b));
        let controller = ViewportController::new(point(0.0, 0.0), start, 800, 600).unwrap();
        let zoom = controller.fit_zoom(&a, &b).unwrap();
        let center = a.midpoint(&b);

        prop_assert!((MIN_ZOOM..=MAX_ZOOM).contains(&zoom));
        if zoom > MIN_ZOOM {
            prop_assert!(fits(&center, zoom, &a, &b));
        }
        if zoom < MAX_ZOOM {
            prop_assert!(!fits(&center, zoom + 1, &a, &b));
        }
    }
}

#[test]
fn zoom_to_fit_centers_between_points() {
    let mut controller = ViewportController::new(point(0.0, 0.0), 3, 800, 600).unwrap();
    let a = point(40.0, -75.0);
    let b = point(40.5, -74.0);
    let viewport = controller.zoom_to_fit(&a, &b).unwrap().expect("viewport changes");
    assert_eq!(viewport.center, a.midpoint(&b));
    assert!(fits(&viewport.center, viewport.zoom, &a, &b));
    assert!(viewport.zoom > 3);
}

#[test]
fn out_of_domain_inputs_are_errors() {
    assert!(GeoPoint::new(91.0, 0.0).is_err());
    assert!(GeoPoint::new(0.0, 180.5).is_err());
    assert!(tile::geo_to_pixel(&point(86.0, 0.0), 5).is_err());
    assert!(tile::geo_to_pixel(&point(0.0, 0.0), 19).is_err());
    assert!(tile::pixel_to_geo(-1.0, 0.0, 3).is_err());
}
