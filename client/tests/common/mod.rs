#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use geomap_client::map::loader::TileSource;
use geomap_client::map::tile::TILE_SIZE;
use geomap_client::{FetchError, GeoPoint, MapSurface, TileKey};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use web_time::Instant;

pub fn point(lat: f64, lon: f64) -> GeoPoint {
    GeoPoint::new(lat, lon).unwrap()
}

pub fn tile_image() -> RgbaImage {
    RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgba([40, 80, 120, 255]))
}

pub fn png_bytes() -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(tile_image())
        .write_to(&mut cursor, ImageFormat::Png)
        .unwrap();
    cursor.into_inner()
}

/// Serves one PNG for every key, but only once the gate sender is dropped
pub struct GatedSource {
    tile: Vec<u8>,
    gate: Mutex<Receiver<()>>,
    fetched: AtomicUsize,
}

impl GatedSource {
    pub fn new() -> (Self, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let source = Self {
            tile: png_bytes(),
            gate: Mutex::new(rx),
            fetched: AtomicUsize::new(0),
        };
        (source, tx)
    }

    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }
}

impl TileSource for GatedSource {
    fn fetch_tile(&self, _key: TileKey) -> Result<Vec<u8>, FetchError> {
        // Blocks until the sender is dropped, then returns immediately
        let _ = self.gate.lock().unwrap().recv();
        self.fetched.fetch_add(1, Ordering::SeqCst);
        Ok(self.tile.clone())
    }
}

/// Poll until every tile of the current view is resident or 10s pass
pub fn settle(surface: &mut MapSurface) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        surface.poll();
        let loaded = surface.composite().is_some_and(|c| c.blank_tiles == 0);
        if loaded || Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
