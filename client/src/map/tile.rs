//! Tile coordinate system and conversions
//! Uses Web Mercator projection (EPSG:3857) compatible with OSM

use std::collections::HashSet;
use std::f64::consts::PI;
use std::fmt;

use chrono::{DateTime, Utc};

use super::camera::Viewport;
use crate::error::CoordinateError;

/// Tile size in pixels (standard OSM tile size)
pub const TILE_SIZE: u32 = 256;

/// Deepest zoom level the projection functions accept
pub const MAX_ZOOM: u8 = 18;

/// Shallowest zoom level a viewport is allowed to show by default
pub const MIN_ZOOM: u8 = 1;

/// Latitude where the square Mercator world ends, atan(sinh(PI)) in degrees
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Geographic location, optionally stamped with the interval it was recorded over
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
    timestamp_start: Option<DateTime<Utc>>,
    timestamp_end: Option<DateTime<Utc>>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(CoordinateError::NotFinite);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
            timestamp_start: None,
            timestamp_end: None,
        })
    }

    /// History point recorded between `start` and `end`
    pub fn with_timestamps(mut self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        self.timestamp_start = Some(start);
        self.timestamp_end = end;
        self
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn timestamp_start(&self) -> Option<DateTime<Utc>> {
        self.timestamp_start
    }

    pub fn timestamp_end(&self) -> Option<DateTime<Utc>> {
        self.timestamp_end
    }

    /// Flat Euclidean distance on raw degree values
    pub fn planar_distance(&self, other: &GeoPoint) -> f64 {
        let dlat = self.latitude - other.latitude;
        let dlon = self.longitude - other.longitude;
        (dlat * dlat + dlon * dlon).sqrt()
    }

    /// Arithmetic midpoint of both coordinates
    pub fn midpoint(&self, other: &GeoPoint) -> GeoPoint {
        GeoPoint {
            latitude: (self.latitude + other.latitude) / 2.0,
            longitude: (self.longitude + other.longitude) / 2.0,
            timestamp_start: None,
            timestamp_end: None,
        }
    }

    /// Same coordinates, ignoring timestamps
    pub fn same_location(&self, other: &GeoPoint) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

fn write_dms(f: &mut fmt::Formatter<'_>, value: f64, positive: char, negative: char) -> fmt::Result {
    let hemisphere = if value < 0.0 { negative } else { positive };
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = (value - degrees) * 60.0;
    let seconds = (minutes - minutes.trunc()) * 60.0;
    write!(
        f,
        "{} {:02}\u{b0} {:02}' {:06.3}\"",
        hemisphere,
        degrees as u32,
        minutes.trunc() as u32,
        seconds
    )
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_dms(f, self.latitude, 'N', 'S')?;
        f.write_str(" ")?;
        write_dms(f, self.longitude, 'E', 'W')
    }
}

/// Latitude/longitude rectangle, edges inclusive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        Self {
            lat_min: lat_min.min(lat_max),
            lat_max: lat_min.max(lat_max),
            lon_min: lon_min.min(lon_max),
            lon_max: lon_min.max(lon_max),
        }
    }

    /// Box spanned by two opposite corners in any order
    pub fn from_corners(a: &GeoPoint, b: &GeoPoint) -> Self {
        Self::new(a.latitude, b.latitude, a.longitude, b.longitude)
    }

    /// Box extending `half_lat`/`half_lon` degrees around a center
    pub fn around(center: &GeoPoint, half_lat: f64, half_lon: f64) -> Self {
        Self::new(
            center.latitude - half_lat,
            center.latitude + half_lat,
            center.longitude - half_lon,
            center.longitude + half_lon,
        )
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.lat_min
            && latitude <= self.lat_max
            && longitude >= self.lon_min
            && longitude <= self.lon_max
    }

    pub fn contains_point(&self, point: &GeoPoint) -> bool {
        self.contains(point.latitude, point.longitude)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.lat_min <= other.lat_max
            && other.lat_min <= self.lat_max
            && self.lon_min <= other.lon_max
            && other.lon_min <= self.lon_max
    }

    /// True when the box has no area along at least one axis
    pub fn is_degenerate(&self) -> bool {
        !(self.lat_max > self.lat_min && self.lon_max > self.lon_min)
    }

    /// Split a box whose longitudes may run past ±180 into in-range parts.
    ///
    /// Each part comes with the longitude shift, in degrees, that maps a
    /// point inside it back into this box's unwrapped frame.
    pub fn wrap_longitude(&self) -> Vec<(BoundingBox, f64)> {
        if self.lon_max - self.lon_min >= 360.0 {
            return vec![(BoundingBox::new(self.lat_min, self.lat_max, -180.0, 180.0), 0.0)];
        }
        let mut parts = Vec::with_capacity(2);
        for shift in [-360.0, 0.0, 360.0] {
            let lon_min = (self.lon_min - shift).max(-180.0);
            let lon_max = (self.lon_max - shift).min(180.0);
            let keep = if shift == 0.0 {
                lon_min <= lon_max
            } else {
                lon_min < lon_max
            };
            if keep {
                let part = BoundingBox {
                    lat_min: self.lat_min,
                    lat_max: self.lat_max,
                    lon_min,
                    lon_max,
                };
                parts.push((part, shift));
            }
        }
        parts
    }
}

/// Unique identifier for a map tile
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TileKey {
    pub zoom: u8,
    pub x: i64,
    pub y: i64,
}

impl TileKey {
    pub fn new(zoom: u8, x: i64, y: i64) -> Self {
        Self { zoom, x, y }
    }

    /// Number of tiles along each axis at this key's zoom
    pub fn tiles_per_side(&self) -> i64 {
        1_i64 << self.zoom
    }

    pub fn is_in_world(&self) -> bool {
        let n = self.tiles_per_side();
        (0..n).contains(&self.x) && (0..n).contains(&self.y)
    }

    /// Expand a `{z}/{x}/{y}` URL template for this tile
    pub fn to_url(&self, template: &str) -> String {
        template
            .replace("{z}", &self.zoom.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

fn check_zoom(zoom: u8) -> Result<(), CoordinateError> {
    if zoom > MAX_ZOOM {
        return Err(CoordinateError::ZoomOutOfRange {
            zoom,
            min: 0,
            max: MAX_ZOOM,
        });
    }
    Ok(())
}

/// Edge length of the whole world bitmap in pixels
pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE as f64 * (1_u64 << zoom) as f64
}

/// Convert a location to global pixel coordinates at given zoom
pub fn geo_to_pixel(point: &GeoPoint, zoom: u8) -> Result<(f64, f64), CoordinateError> {
    check_zoom(zoom)?;
    if point.latitude.abs() > MAX_LATITUDE {
        return Err(CoordinateError::BeyondProjection(point.latitude));
    }

    let world = world_size(zoom);
    let x = (point.longitude + 180.0) / 360.0 * world;
    let lat_rad = point.latitude.to_radians();
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * world;

    Ok((x, y))
}

/// Convert global pixel coordinates back to a location
pub fn pixel_to_geo(x: f64, y: f64, zoom: u8) -> Result<GeoPoint, CoordinateError> {
    check_zoom(zoom)?;
    if !x.is_finite() || !y.is_finite() {
        return Err(CoordinateError::NotFinite);
    }

    let world = world_size(zoom);
    if !(0.0..=world).contains(&x) || !(0.0..=world).contains(&y) {
        return Err(CoordinateError::PixelOutOfRange { x, y, zoom });
    }

    let longitude = x / world * 360.0 - 180.0;
    let latitude = (PI * (1.0 - 2.0 * y / world)).sinh().atan().to_degrees();
    GeoPoint::new(latitude, longitude)
}

/// Tile containing the given global pixel
pub fn tile_for_pixel(x: f64, y: f64, zoom: u8) -> TileKey {
    let size = TILE_SIZE as f64;
    TileKey::new(zoom, (x / size).floor() as i64, (y / size).floor() as i64)
}

/// Geographic area visible in the viewport.
///
/// Parts of the viewport that extend past the world bitmap (low zoom, large
/// window) contribute nothing; the box is the visible part of the world.
pub fn coverage(viewport: &Viewport) -> Result<BoundingBox, CoordinateError> {
    let zoom = viewport.zoom;
    let (cx, cy) = geo_to_pixel(&viewport.center, zoom)?;
    let world = world_size(zoom);
    let half_w = viewport.width as f64 / 2.0;
    let half_h = viewport.height as f64 / 2.0;

    let left = (cx - half_w).max(0.0);
    let right = (cx + half_w).min(world);
    let top = (cy - half_h).max(0.0);
    let bottom = (cy + half_h).min(world);

    let north_west = pixel_to_geo(left, top, zoom)?;
    let south_east = pixel_to_geo(right, bottom, zoom)?;
    Ok(BoundingBox::from_corners(&north_west, &south_east))
}

/// Geographic areas visible in the viewport with columns wrapped like tiles.
///
/// A view straddling the antimeridian yields one part per side, each with
/// its longitude shift (see [`BoundingBox::wrap_longitude`]).
pub fn visible_areas(viewport: &Viewport) -> Result<Vec<(BoundingBox, f64)>, CoordinateError> {
    let zoom = viewport.zoom;
    let (cx, cy) = geo_to_pixel(&viewport.center, zoom)?;
    let world = world_size(zoom);
    let half_w = viewport.width as f64 / 2.0;
    let half_h = viewport.height as f64 / 2.0;

    let top = (cy - half_h).max(0.0);
    let bottom = (cy + half_h).min(world);
    let north = pixel_to_geo(0.0, top, zoom)?.latitude;
    let south = pixel_to_geo(0.0, bottom, zoom)?.latitude;

    let to_lon = |x: f64| x / world * 360.0 - 180.0;
    Ok(BoundingBox::new(south, north, to_lon(cx - half_w), to_lon(cx + half_w)).wrap_longitude())
}

/// Grid of tiles needed to cover a viewport, in row-major order
#[derive(Clone, Debug, PartialEq)]
pub struct TileSet {
    pub zoom: u8,
    pub columns: usize,
    pub rows: usize,
    /// Pixel position of the first tile relative to the viewport origin
    pub offset: (i32, i32),
    pub width: u32,
    pub height: u32,
    /// Viewport generation this set was produced for
    pub generation: u64,
    /// `None` marks grid cells above or below the world
    tiles: Vec<Option<TileKey>>,
    missing: Vec<TileKey>,
}

impl TileSet {
    fn empty(viewport: &Viewport) -> Self {
        Self {
            zoom: viewport.zoom,
            columns: 0,
            rows: 0,
            offset: (0, 0),
            width: viewport.width,
            height: viewport.height,
            generation: 0,
            tiles: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub(crate) fn with_missing(mut self, missing: Vec<TileKey>) -> Self {
        self.missing = missing;
        self
    }

    pub fn tiles(&self) -> &[Option<TileKey>] {
        &self.tiles
    }

    /// Distinct in-world keys, first occurrence order
    pub fn keys(&self) -> Vec<TileKey> {
        let mut seen = HashSet::new();
        self.tiles
            .iter()
            .flatten()
            .filter(|key| seen.insert(**key))
            .copied()
            .collect()
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.iter().flatten().any(|k| k == key)
    }

    /// Keys that were not resident when the set was last requested
    pub fn missing(&self) -> &[TileKey] {
        &self.missing
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Top-left pixel of grid cell `index` relative to the viewport origin
    pub fn cell_origin(&self, index: usize) -> (i64, i64) {
        let size = TILE_SIZE as i64;
        let column = (index % self.columns.max(1)) as i64;
        let row = (index / self.columns.max(1)) as i64;
        (
            self.offset.0 as i64 + column * size,
            self.offset.1 as i64 + row * size,
        )
    }
}

/// Enumerate every tile intersecting the viewport's pixel rectangle.
///
/// Columns wrap around the antimeridian; rows past the poles stay empty.
pub fn tile_set_for(viewport: &Viewport) -> Result<TileSet, CoordinateError> {
    if !viewport.is_valid() {
        return Ok(TileSet::empty(viewport));
    }

    let zoom = viewport.zoom;
    let size = TILE_SIZE as f64;
    let (cx, cy) = geo_to_pixel(&viewport.center, zoom)?;
    let origin_x = cx - viewport.width as f64 / 2.0;
    let origin_y = cy - viewport.height as f64 / 2.0;

    let first_x = (origin_x / size).floor() as i64;
    let first_y = (origin_y / size).floor() as i64;
    let last_x = ((origin_x + viewport.width as f64) / size).ceil() as i64 - 1;
    let last_y = ((origin_y + viewport.height as f64) / size).ceil() as i64 - 1;

    let columns = (last_x - first_x + 1).max(1) as usize;
    let rows = (last_y - first_y + 1).max(1) as usize;
    let n = 1_i64 << zoom;

    let mut tiles = Vec::with_capacity(columns * rows);
    for ty in first_y..first_y + rows as i64 {
        for tx in first_x..first_x + columns as i64 {
            if (0..n).contains(&ty) {
                tiles.push(Some(TileKey::new(zoom, tx.rem_euclid(n), ty)));
            } else {
                tiles.push(None);
            }
        }
    }

    Ok(TileSet {
        zoom,
        columns,
        rows,
        offset: (
            (first_x as f64 * size - origin_x).round() as i32,
            (first_y as f64 * size - origin_y).round() as i32,
        ),
        width: viewport.width,
        height: viewport.height,
        generation: 0,
        tiles,
        missing: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_geo_to_pixel_matches_osm_tiles() {
        // Seoul (approx 126.9780, 37.5665)
        let (x, y) = geo_to_pixel(&point(37.5665, 126.9780), 10).unwrap();
        let key = tile_for_pixel(x, y, 10);
        assert_eq!(key, TileKey::new(10, 872, 395));
    }

    #[test]
    fn test_pixel_roundtrip() {
        let p = point(-33.8688, 151.2093);
        let (x, y) = geo_to_pixel(&p, 14).unwrap();
        let back = pixel_to_geo(x, y, 14).unwrap();
        assert!((back.latitude() - p.latitude()).abs() < 1e-9);
        assert!((back.longitude() - p.longitude()).abs() < 1e-9);
    }

    #[test]
    fn test_world_edges() {
        let (x, y) = geo_to_pixel(&point(0.0, -180.0), 2).unwrap();
        assert_eq!(x, 0.0);
        assert!((y - 512.0).abs() < 1e-9);
        let top = pixel_to_geo(0.0, 0.0, 2).unwrap();
        assert!(top.latitude() <= MAX_LATITUDE);
        assert!(geo_to_pixel(&top, 2).is_ok());
    }

    #[test]
    fn test_domain_errors_are_not_clamped() {
        assert_eq!(
            GeoPoint::new(91.0, 0.0),
            Err(CoordinateError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            GeoPoint::new(0.0, -180.5),
            Err(CoordinateError::LongitudeOutOfRange(-180.5))
        );
        assert_eq!(GeoPoint::new(f64::NAN, 0.0), Err(CoordinateError::NotFinite));
        assert_eq!(
            geo_to_pixel(&point(86.0, 0.0), 3),
            Err(CoordinateError::BeyondProjection(86.0))
        );
        assert!(matches!(
            geo_to_pixel(&point(0.0, 0.0), MAX_ZOOM + 1),
            Err(CoordinateError::ZoomOutOfRange { .. })
        ));
        assert!(matches!(
            pixel_to_geo(-1.0, 10.0, 3),
            Err(CoordinateError::PixelOutOfRange { .. })
        ));
    }

    #[test]
    fn test_tile_for_pixel_floors_negative() {
        assert_eq!(tile_for_pixel(-0.5, 255.9, 3), TileKey::new(3, -1, 0));
        assert_eq!(tile_for_pixel(256.0, 512.0, 3), TileKey::new(3, 1, 2));
    }

    #[test]
    fn test_tile_set_worst_case_count() {
        let viewport = Viewport::new(point(40.0, -75.0), 10, 800, 600);
        let set = tile_set_for(&viewport).unwrap();
        let size = TILE_SIZE as f64;
        assert!(set.columns <= (800.0 / size + 1.0).ceil() as usize);
        assert!(set.rows <= (600.0 / size + 1.0).ceil() as usize);
        assert_eq!(set.tiles().len(), set.columns * set.rows);
        assert!(set.offset.0 <= 0 && set.offset.0 > -(TILE_SIZE as i32));
        assert!(set.offset.1 <= 0 && set.offset.1 > -(TILE_SIZE as i32));
    }

    #[test]
    fn test_tile_set_wraps_columns_and_skips_poles() {
        let viewport = Viewport::new(point(0.0, 179.9), 1, 1024, 1024);
        let set = tile_set_for(&viewport).unwrap();
        assert!(set.tiles().iter().any(|t| t.is_none()));
        for key in set.keys() {
            assert!(key.is_in_world(), "{:?}", key);
        }
        assert!(set.contains(&TileKey::new(1, 0, 0)));
        assert!(set.contains(&TileKey::new(1, 1, 1)));
    }

    #[test]
    fn test_tile_set_for_invalid_viewport_is_empty() {
        let viewport = Viewport::new(point(10.0, 10.0), 5, 0, 600);
        assert!(tile_set_for(&viewport).unwrap().is_empty());
    }

    #[test]
    fn test_coverage_contains_center_and_edges() {
        let viewport = Viewport::new(point(40.0, -75.0), 10, 800, 600);
        let area = coverage(&viewport).unwrap();
        assert!(area.contains_point(&viewport.center));

        let (cx, cy) = geo_to_pixel(&viewport.center, 10).unwrap();
        let corner = pixel_to_geo(cx + 400.0, cy + 300.0, 10).unwrap();
        assert!(area.contains_point(&corner));
        let outside = pixel_to_geo(cx + 402.0, cy, 10).unwrap();
        assert!(!area.contains_point(&outside));
    }

    #[test]
    fn test_wrap_longitude_splits_at_antimeridian() {
        let inside = BoundingBox::new(0.0, 10.0, 20.0, 30.0);
        assert_eq!(inside.wrap_longitude(), vec![(inside, 0.0)]);

        let parts = BoundingBox::new(0.0, 10.0, 170.0, 190.0).wrap_longitude();
        assert_eq!(
            parts,
            vec![
                (BoundingBox::new(0.0, 10.0, 170.0, 180.0), 0.0),
                (BoundingBox::new(0.0, 10.0, -180.0, -170.0), 360.0),
            ]
        );

        let parts = BoundingBox::new(0.0, 10.0, -185.0, -175.0).wrap_longitude();
        assert_eq!(parts[0], (BoundingBox::new(0.0, 10.0, 175.0, 180.0), -360.0));
        assert_eq!(parts[1], (BoundingBox::new(0.0, 10.0, -180.0, -175.0), 0.0));

        let whole = BoundingBox::new(0.0, 10.0, -200.0, 200.0).wrap_longitude();
        assert_eq!(whole, vec![(BoundingBox::new(0.0, 10.0, -180.0, 180.0), 0.0)]);
    }

    #[test]
    fn test_visible_areas_wrap_like_tiles() {
        let viewport = Viewport::new(point(0.0, 179.0), 5, 800, 600);
        let areas = visible_areas(&viewport).unwrap();
        assert_eq!(areas.len(), 2);
        assert!(areas[0].0.contains(0.0, 179.5));
        assert!(areas[1].0.contains(0.0, -179.5));
        assert_eq!(areas[1].1, 360.0);

        let clipped = coverage(&viewport).unwrap();
        assert!(!clipped.contains(0.0, -179.5));
    }

    #[test]
    fn test_coverage_at_low_zoom_is_whole_world() {
        let viewport = Viewport::new(point(0.0, 0.0), 1, 2000, 2000);
        let area = coverage(&viewport).unwrap();
        assert_eq!(area.lon_min, -180.0);
        assert_eq!(area.lon_max, 180.0);
        assert!((area.lat_max - MAX_LATITUDE).abs() < 1e-9);
    }

    #[test]
    fn test_url_template() {
        let key = TileKey::new(7, 12, 34);
        assert_eq!(
            key.to_url("https://tile.openstreetmap.org/{z}/{x}/{y}.png"),
            "https://tile.openstreetmap.org/7/12/34.png"
        );
    }

    #[test]
    fn test_display_dms() {
        assert_eq!(
            point(40.5, -75.25).to_string(),
            "N 40\u{b0} 30' 00.000\" W 75\u{b0} 15' 00.000\""
        );
    }

    #[test]
    fn test_bounding_box_normalizes_and_detects_degenerate() {
        let bbox = BoundingBox::from_corners(&point(10.0, 20.0), &point(5.0, 15.0));
        assert_eq!(bbox.lat_min, 5.0);
        assert_eq!(bbox.lon_max, 20.0);
        assert!(bbox.contains(10.0, 15.0));
        assert!(BoundingBox::new(1.0, 1.0, 0.0, 5.0).is_degenerate());
    }
}
