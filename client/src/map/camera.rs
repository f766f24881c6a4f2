//! Map camera for viewport management, panning, and zooming

use super::tile::{self, BoundingBox, GeoPoint, MAX_ZOOM, MIN_ZOOM};
use crate::error::CoordinateError;

/// Movement below this many pixels is a click, not a drag
pub const DRAG_JITTER: i32 = 8;

/// Window onto the map: center point, zoom and pixel size
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub center: GeoPoint,
    pub zoom: u8,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(center: GeoPoint, zoom: u8, width: u32, height: u32) -> Self {
        Self {
            center,
            zoom,
            width,
            height,
        }
    }

    /// A viewport with no area draws nothing and accepts no gestures
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Global pixel position of the viewport's top-left corner
    pub fn origin_pixel(&self) -> Result<(f64, f64), CoordinateError> {
        let (cx, cy) = tile::geo_to_pixel(&self.center, self.zoom)?;
        Ok((cx - self.width as f64 / 2.0, cy - self.height as f64 / 2.0))
    }

    /// Screen position of a location relative to the viewport origin
    pub fn to_screen(&self, point: &GeoPoint) -> Result<(f64, f64), CoordinateError> {
        let (ox, oy) = self.origin_pixel()?;
        let (x, y) = tile::geo_to_pixel(point, self.zoom)?;
        Ok((x - ox, y - oy))
    }

    /// Location under a screen position; columns wrap around the antimeridian
    pub fn location_at(&self, screen_x: f64, screen_y: f64) -> Result<GeoPoint, CoordinateError> {
        let (ox, oy) = self.origin_pixel()?;
        let world = tile::world_size(self.zoom);
        let x = (ox + screen_x).rem_euclid(world);
        tile::pixel_to_geo(x, oy + screen_y, self.zoom)
    }

    pub fn coverage(&self) -> Result<BoundingBox, CoordinateError> {
        tile::coverage(self)
    }

    /// Visible areas split at the antimeridian, each with its longitude shift
    pub fn visible_areas(&self) -> Result<Vec<(BoundingBox, f64)>, CoordinateError> {
        tile::visible_areas(self)
    }

    /// Screen position of a point found in a visible area shifted by `shift` degrees
    pub fn to_screen_shifted(&self, point: &GeoPoint, shift: f64) -> Result<(f64, f64), CoordinateError> {
        let (x, y) = self.to_screen(point)?;
        Ok((x + shift / 360.0 * tile::world_size(self.zoom), y))
    }

    /// Whether the whole world height fits into the viewport
    pub fn covers_world_height(&self) -> bool {
        self.height as f64 >= tile::world_size(self.zoom)
    }

    fn covers_world(&self) -> bool {
        let world = tile::world_size(self.zoom);
        self.width as f64 >= world && self.height as f64 >= world
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    /// Wheel convention: positive counts zoom in
    pub fn from_wheel(count: i32) -> Option<Self> {
        match count {
            c if c > 0 => Some(ZoomDirection::In),
            c if c < 0 => Some(ZoomDirection::Out),
            _ => None,
        }
    }
}

/// Outcome of a completed press/release pair
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gesture {
    /// Release stayed within the jitter threshold
    Click { x: i32, y: i32 },
    /// Drag committed; delta is how far the view center moves, in pixels
    Pan { dx: i32, dy: i32 },
    /// Selection rectangle committed, corners in screen pixels
    RectangleZoom { from: (i32, i32), to: (i32, i32) },
}

/// Owns the viewport and turns gestures into new viewport state.
///
/// Every applied change bumps the generation so asynchronous results
/// produced for an older view can be recognised and dropped.
#[derive(Debug)]
pub struct ViewportController {
    viewport: Viewport,
    min_zoom: u8,
    max_zoom: u8,
    jitter: i32,
    generation: u64,
}

impl ViewportController {
    /// Create a controller; the center must lie inside the projection band
    pub fn new(center: GeoPoint, zoom: u8, width: u32, height: u32) -> Result<Self, CoordinateError> {
        let controller = Self {
            viewport: Viewport::new(center, zoom, width, height),
            min_zoom: MIN_ZOOM,
            max_zoom: MAX_ZOOM,
            jitter: DRAG_JITTER,
            generation: 0,
        };
        controller.check_zoom(zoom)?;
        tile::geo_to_pixel(&controller.viewport.center, zoom)?;
        Ok(controller)
    }

    /// Override zoom bounds; both must lie within the projection's range
    /// and the current zoom must lie within them
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Result<Self, CoordinateError> {
        if min_zoom > max_zoom || min_zoom < MIN_ZOOM || max_zoom > MAX_ZOOM {
            return Err(CoordinateError::ZoomOutOfRange {
                zoom: if max_zoom > MAX_ZOOM { max_zoom } else { min_zoom },
                min: MIN_ZOOM,
                max: MAX_ZOOM,
            });
        }
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self.check_zoom(self.viewport.zoom)?;
        Ok(self)
    }

    pub fn with_jitter(mut self, jitter: i32) -> Self {
        self.jitter = jitter.max(0);
        self
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn zoom_range(&self) -> (u8, u8) {
        (self.min_zoom, self.max_zoom)
    }

    pub fn jitter(&self) -> i32 {
        self.jitter
    }

    /// Vertical drag is meaningless once the whole world height is visible
    pub fn vertical_drag_allowed(&self) -> bool {
        !self.viewport.covers_world_height()
    }

    fn check_zoom(&self, zoom: u8) -> Result<(), CoordinateError> {
        if zoom < self.min_zoom || zoom > self.max_zoom {
            return Err(CoordinateError::ZoomOutOfRange {
                zoom,
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        Ok(())
    }

    /// Commit a candidate viewport after checking it projects cleanly
    fn apply(&mut self, mut candidate: Viewport) -> Result<Viewport, CoordinateError> {
        if candidate.covers_world_height() {
            candidate.center = GeoPoint::new(0.0, candidate.center.longitude())?;
        }
        tile::geo_to_pixel(&candidate.center, candidate.zoom)?;
        self.viewport = candidate;
        self.generation += 1;
        Ok(self.viewport)
    }

    /// Show the map at a location and zoom
    pub fn show_map(&mut self, center: GeoPoint, zoom: u8) -> Result<Viewport, CoordinateError> {
        self.check_zoom(zoom)?;
        self.apply(Viewport { center, zoom, ..self.viewport })
    }

    pub fn set_zoom(&mut self, zoom: u8) -> Result<Option<Viewport>, CoordinateError> {
        self.check_zoom(zoom)?;
        if zoom == self.viewport.zoom {
            return Ok(None);
        }
        self.apply(Viewport { zoom, ..self.viewport }).map(Some)
    }

    /// Update viewport size in pixels; returns whether the result can be drawn
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, CoordinateError> {
        self.apply(Viewport {
            width,
            height,
            ..self.viewport
        })?;
        Ok(self.viewport.is_valid())
    }

    /// Move the view center by a pixel delta at the current zoom
    pub fn pan(&mut self, dx: i32, dy: i32) -> Result<Option<Viewport>, CoordinateError> {
        if !self.viewport.is_valid() {
            return Ok(None);
        }
        let dy = if self.vertical_drag_allowed() { dy } else { 0 };
        if dx.abs() <= self.jitter && dy.abs() <= self.jitter {
            return Ok(None);
        }

        let zoom = self.viewport.zoom;
        let (cx, cy) = tile::geo_to_pixel(&self.viewport.center, zoom)?;
        let world = tile::world_size(zoom);
        let x = (cx + dx as f64).rem_euclid(world);
        let center = tile::pixel_to_geo(x, cy + dy as f64, zoom)?;
        self.apply(Viewport { center, ..self.viewport }).map(Some)
    }

    fn step_zoom(&self, direction: ZoomDirection, step: u8) -> Option<u8> {
        let zoom = self.viewport.zoom;
        let target = match direction {
            ZoomDirection::In => zoom.saturating_add(step).min(self.max_zoom),
            ZoomDirection::Out => {
                if self.viewport.covers_world() {
                    return None;
                }
                zoom.saturating_sub(step).max(self.min_zoom)
            }
        };
        (target != zoom).then_some(target)
    }

    /// Zoom one level keeping the center; no-op at a bound
    pub fn zoom_by(&mut self, direction: ZoomDirection) -> Result<Option<Viewport>, CoordinateError> {
        if !self.viewport.is_valid() {
            return Ok(None);
        }
        match self.step_zoom(direction, 1) {
            Some(zoom) => self.apply(Viewport { zoom, ..self.viewport }).map(Some),
            None => Ok(None),
        }
    }

    /// Zoom one level keeping the location under the cursor in place
    pub fn zoom_at(
        &mut self,
        direction: ZoomDirection,
        screen_x: f64,
        screen_y: f64,
    ) -> Result<Option<Viewport>, CoordinateError> {
        if !self.viewport.is_valid() {
            return Ok(None);
        }
        let Some(zoom) = self.step_zoom(direction, 1) else {
            return Ok(None);
        };

        let anchor = self.viewport.location_at(screen_x, screen_y)?;
        let (ax, ay) = tile::geo_to_pixel(&anchor, zoom)?;
        let cx = ax - (screen_x - self.viewport.width as f64 / 2.0);
        let cy = ay - (screen_y - self.viewport.height as f64 / 2.0);
        let world = tile::world_size(zoom);
        let center = tile::pixel_to_geo(cx.rem_euclid(world), cy, zoom)?;

        self.apply(Viewport { center, zoom, ..self.viewport }).map(Some)
    }

    /// Zoom in on a double-clicked location, four levels with `fast`
    pub fn zoom_in_at_location(
        &mut self,
        screen_x: f64,
        screen_y: f64,
        fast: bool,
    ) -> Result<Option<Viewport>, CoordinateError> {
        if !self.viewport.is_valid() {
            return Ok(None);
        }
        let step = if fast { 4 } else { 1 };
        let Some(zoom) = self.step_zoom(ZoomDirection::In, step) else {
            return Ok(None);
        };
        let center = self.viewport.location_at(screen_x, screen_y)?;
        self.apply(Viewport { center, zoom, ..self.viewport }).map(Some)
    }

    fn fits(&self, center: &GeoPoint, zoom: u8, a: &GeoPoint, b: &GeoPoint) -> Result<bool, CoordinateError> {
        let area = tile::coverage(&Viewport { center: *center, zoom, ..self.viewport })?;
        Ok(area.contains_point(a) && area.contains_point(b))
    }

    /// Largest zoom whose centered coverage still holds both points.
    ///
    /// Walks from the current zoom, downward first if the points do not fit
    /// there, then upward; never more than `max_zoom - min_zoom` steps.
    pub fn fit_zoom(&self, a: &GeoPoint, b: &GeoPoint) -> Result<u8, CoordinateError> {
        let center = a.midpoint(b);
        let mut zoom = self.viewport.zoom;

        if !self.fits(&center, zoom, a, b)? {
            while zoom > self.min_zoom {
                zoom -= 1;
                if self.fits(&center, zoom, a, b)? {
                    break;
                }
            }
            return Ok(zoom);
        }

        while zoom < self.max_zoom {
            if !self.fits(&center, zoom + 1, a, b)? {
                break;
            }
            zoom += 1;
        }
        Ok(zoom)
    }

    /// Center between two points at the deepest zoom that shows both
    pub fn zoom_to_fit(&mut self, a: &GeoPoint, b: &GeoPoint) -> Result<Option<Viewport>, CoordinateError> {
        if !self.viewport.is_valid() {
            return Ok(None);
        }
        let zoom = self.fit_zoom(a, b)?;
        let center = a.midpoint(b);
        self.apply(Viewport { center, zoom, ..self.viewport }).map(Some)
    }

    /// Classify a press/release pair. `select` is the rectangle modifier.
    pub fn classify_click(&self, press: (i32, i32), release: (i32, i32), select: bool) -> Gesture {
        let dx = press.0 - release.0;
        let dy = press.1 - release.1;
        if dx.abs() <= self.jitter && dy.abs() <= self.jitter {
            Gesture::Click {
                x: release.0,
                y: release.1,
            }
        } else if select {
            Gesture::RectangleZoom {
                from: press,
                to: release,
            }
        } else {
            Gesture::Pan { dx, dy }
        }
    }

    /// Apply a classified gesture; clicks never change the viewport
    pub fn apply_gesture(&mut self, gesture: Gesture) -> Result<Option<Viewport>, CoordinateError> {
        match gesture {
            Gesture::Click { .. } => Ok(None),
            Gesture::Pan { dx, dy } => self.pan(dx, dy),
            Gesture::RectangleZoom { from, to } => {
                if !self.viewport.is_valid() || self.viewport.zoom >= self.max_zoom {
                    return Ok(None);
                }
                let a = self.viewport.location_at(from.0 as f64, from.1 as f64)?;
                let b = self.viewport.location_at(to.0 as f64, to.1 as f64)?;
                self.zoom_to_fit(&a, &b)
            }
        }
    }
}
