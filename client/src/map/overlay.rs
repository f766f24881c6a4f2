//! What gets drawn on top of the tile composite
//!
//! The core never rasterizes overlays. It produces [`OverlayPrimitive`]s in
//! viewport pixel coordinates and hands them, together with the composite,
//! to a [`RenderSink`] supplied by the host.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::camera::{Viewport, ZoomDirection};
use super::geolocation::GeoLocationContext;

pub type Color = Rgba<u8>;

pub const MARKER_COLOR: Color = Rgba([220, 40, 40, 255]);
pub const TRACK_COLOR: Color = Rgba([0, 0, 255, 255]);
pub const HIGHLIGHT_COLOR: Color = Rgba([255, 128, 0, 255]);
pub const SELECTION_COLOR: Color = Rgba([0, 0, 255, 64]);
pub const LABEL_COLOR: Color = Rgba([0, 0, 0, 255]);

pub const ATTRIBUTION: &str = "Map data \u{a9} OpenStreetMap contributors";

/// Axis-aligned rectangle in viewport pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenRect {
    /// Rectangle spanned by two opposite corners
    pub fn from_corners(a: (i32, i32), b: (i32, i32)) -> Self {
        Self {
            x: a.0.min(b.0),
            y: a.1.min(b.1),
            width: (a.0 - b.0).abs(),
            height: (a.1 - b.1).abs(),
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OverlayPrimitive {
    Point {
        x: f64,
        y: f64,
        radius: f64,
        color: Color,
    },
    Line {
        points: Vec<(f64, f64)>,
        width: f64,
        color: Color,
    },
    /// Text label with a pointer to its anchor
    Callout {
        x: f64,
        y: f64,
        text: String,
        color: Color,
    },
    SelectionRect {
        rect: ScreenRect,
        color: Color,
    },
    ZoomControl {
        rect: ScreenRect,
        zoom: u8,
    },
    InfoText {
        text: String,
    },
    Title {
        text: String,
    },
}

/// Final pixel drawing, supplied by the host UI
pub trait RenderSink {
    /// `offset` is where the composite's top-left corner goes in the viewport
    fn present(&mut self, composite: &RgbaImage, offset: (i32, i32), overlays: &[OverlayPrimitive]);
}

/// Something that contributes primitives for a viewport
pub trait Overlay {
    fn draw_overlay(&self, viewport: &Viewport, out: &mut Vec<OverlayPrimitive>);
}

/// +/- zoom buttons anchored to the bottom-right corner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoomControl {
    pub rect: ScreenRect,
}

impl ZoomControl {
    const WIDTH: i32 = 40;
    const HEIGHT: i32 = 80;
    const MARGIN: i32 = 10;

    pub fn layout(width: u32, height: u32) -> Self {
        Self {
            rect: ScreenRect {
                x: width as i32 - Self::WIDTH - Self::MARGIN,
                y: height as i32 - Self::HEIGHT - Self::MARGIN,
                width: Self::WIDTH,
                height: Self::HEIGHT,
            },
        }
    }

    /// Upper half zooms in, lower half zooms out
    pub fn hit(&self, x: i32, y: i32) -> Option<ZoomDirection> {
        if !self.rect.contains(x, y) {
            return None;
        }
        if y < self.rect.y + self.rect.height / 2 {
            Some(ZoomDirection::In)
        } else {
            Some(ZoomDirection::Out)
        }
    }
}

/// Attribution, zoom level and center position
pub fn info_text(viewport: &Viewport) -> String {
    format!(
        "{} | zoom {} | {}",
        ATTRIBUTION, viewport.zoom, viewport.center
    )
}

/// Live positions of tracked objects inside the current coverage
pub struct ObjectMarkers {
    context: Arc<GeoLocationContext>,
    filter: Option<String>,
}

impl ObjectMarkers {
    pub fn new(context: Arc<GeoLocationContext>) -> Self {
        Self {
            context,
            filter: None,
        }
    }

    /// Only show objects whose name contains `filter`, ignoring case
    pub fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter.filter(|f| !f.is_empty());
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn context(&self) -> &Arc<GeoLocationContext> {
        &self.context
    }
}

impl Overlay for ObjectMarkers {
    fn draw_overlay(&self, viewport: &Viewport, out: &mut Vec<OverlayPrimitive>) {
        let Ok(areas) = viewport.visible_areas() else {
            return;
        };
        for (area, shift) in areas {
            for object in self.context.objects_in_area(&area, self.filter.as_deref()) {
                let Ok((x, y)) = viewport.to_screen_shifted(&object.location, shift) else {
                    continue;
                };
                out.push(OverlayPrimitive::Point {
                    x,
                    y,
                    radius: 4.0,
                    color: MARKER_COLOR,
                });
                out.push(OverlayPrimitive::Callout {
                    x,
                    y,
                    text: object.name,
                    color: LABEL_COLOR,
                });
            }
        }
    }
}
