//! Location history of one object: time window, indexed points and track overlay

use chrono::{DateTime, Duration, Utc};

use super::camera::Viewport;
use super::geolocation::ObjectId;
use super::overlay::{Overlay, OverlayPrimitive, HIGHLIGHT_COLOR, LABEL_COLOR, TRACK_COLOR};
use super::quadtree::SpatialIndex;
use super::tile::{self, BoundingBox, GeoPoint};
use crate::error::FetchError;

pub const DEFAULT_HISTORY_MINUTES: i64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Where location history comes from, usually the management server
pub trait HistorySource: Send + Sync {
    /// Points ordered oldest to newest
    fn fetch_history(&self, object: ObjectId, range: TimeRange) -> Result<Vec<GeoPoint>, FetchError>;
}

/// Period of history to show
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryWindow {
    /// The last `minutes`, ending whenever the fetch runs
    Relative { minutes: i64 },
    /// `minutes` ending at a fixed instant
    Fixed { minutes: i64, until: DateTime<Utc> },
}

impl HistoryWindow {
    pub fn minutes(&self) -> i64 {
        match *self {
            HistoryWindow::Relative { minutes } | HistoryWindow::Fixed { minutes, .. } => minutes,
        }
    }

    pub fn range_at(&self, now: DateTime<Utc>) -> TimeRange {
        let (minutes, end) = match *self {
            HistoryWindow::Relative { minutes } => (minutes, now),
            HistoryWindow::Fixed { minutes, until } => (minutes, until),
        };
        TimeRange {
            start: end - Duration::minutes(minutes.max(0)),
            end,
        }
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow::Relative {
            minutes: DEFAULT_HISTORY_MINUTES,
        }
    }
}

/// History points of one object plus the hover highlight.
///
/// Each fetch is tagged with a request number; only the answer to the most
/// recent request is applied.
pub struct HistoryTrack {
    object: ObjectId,
    window: HistoryWindow,
    index: SpatialIndex,
    highlight: Option<usize>,
    request: u64,
}

impl HistoryTrack {
    pub fn new(object: ObjectId, window: HistoryWindow) -> Self {
        Self {
            object,
            window,
            index: SpatialIndex::new(),
            highlight: None,
            request: 0,
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn window(&self) -> HistoryWindow {
        self.window
    }

    pub fn points(&self) -> &[GeoPoint] {
        self.index.points()
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Show the last `minutes` up to now
    pub fn change_time_period_minutes(&mut self, minutes: i64) {
        self.window = HistoryWindow::Relative { minutes };
    }

    /// Keep the period length but end it at `until`
    pub fn change_time_period_until(&mut self, until: DateTime<Utc>) {
        self.window = HistoryWindow::Fixed {
            minutes: self.window.minutes(),
            until,
        };
    }

    /// Start a new fetch; earlier outstanding fetches become stale
    pub fn begin_request(&mut self, now: DateTime<Utc>) -> (u64, TimeRange) {
        self.request += 1;
        (self.request, self.window.range_at(now))
    }

    /// Apply a fetch result. Returns true if the track changed.
    ///
    /// Stale answers are dropped and a failed fetch keeps the current points.
    pub fn apply(&mut self, request: u64, result: Result<Vec<GeoPoint>, FetchError>) -> bool {
        if request != self.request {
            log::debug!("Discarding stale history result {} (current {})", request, self.request);
            return false;
        }
        match result {
            Ok(points) => {
                self.index.assign(points);
                self.highlight = None;
                true
            }
            Err(e) => {
                log::warn!("Failed to fetch history for object {}: {}", self.object, e);
                false
            }
        }
    }

    /// Highlight the planar-nearest point within `radius` pixels of the
    /// cursor. Returns true if the highlight changed.
    pub fn hover(&mut self, viewport: &Viewport, x: i32, y: i32, radius: i32) -> bool {
        let found = Self::pick(&self.index, viewport, x, y, radius);
        let changed = found != self.highlight;
        self.highlight = found;
        changed
    }

    fn pick(index: &SpatialIndex, viewport: &Viewport, x: i32, y: i32, radius: i32) -> Option<usize> {
        if index.is_empty() || !viewport.is_valid() {
            return None;
        }
        let zoom = viewport.zoom;
        let world = tile::world_size(zoom);
        let r = radius.max(1) as f64;
        let (ox, oy) = viewport.origin_pixel().ok()?;
        let cx = (ox + x as f64).rem_euclid(world);
        let cy = oy + y as f64;

        // Neighbourhood in global pixels, cut to the rows the world has
        let top = (cy - r).max(0.0);
        let bottom = (cy + r).min(world);
        if top > bottom {
            return None;
        }
        let latitude = |py: f64| tile::pixel_to_geo(0.0, py, zoom).map(|p| p.latitude());
        let longitude = |px: f64| px / world * 360.0 - 180.0;

        let area = BoundingBox::new(
            latitude(bottom).ok()?,
            latitude(top).ok()?,
            longitude(cx - r),
            longitude(cx + r),
        );
        let center_lat = latitude(cy.clamp(0.0, world)).ok()?;
        index
            .nearest_in_parts(&area.wrap_longitude(), center_lat, longitude(cx))
            .map(|(i, _)| i)
    }

    pub fn clear_highlight(&mut self) -> bool {
        self.highlight.take().is_some()
    }

    pub fn highlighted(&self) -> Option<(usize, GeoPoint)> {
        let i = self.highlight?;
        self.index.get(i).map(|p| (i, *p))
    }

    /// Timestamps and position of the highlighted point
    pub fn tooltip(&self) -> Option<String> {
        let (_, point) = self.highlighted()?;
        let stamp = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        Some(format!(
            "Start time: {}\nEnd time: {}\nLocation: {}",
            stamp(point.timestamp_start()),
            stamp(point.timestamp_end()),
            point
        ))
    }
}

impl Overlay for HistoryTrack {
    fn draw_overlay(&self, viewport: &Viewport, out: &mut Vec<OverlayPrimitive>) {
        let points = self.points();
        let screen: Vec<(f64, f64)> = points
            .iter()
            .filter_map(|p| viewport.to_screen(p).ok())
            .collect();
        if screen.is_empty() {
            return;
        }

        if screen.len() > 1 {
            out.push(OverlayPrimitive::Line {
                points: screen.clone(),
                width: 2.0,
                color: TRACK_COLOR,
            });
        }
        for &(x, y) in &screen {
            out.push(OverlayPrimitive::Point {
                x,
                y,
                radius: 3.0,
                color: TRACK_COLOR,
            });
        }

        let (sx, sy) = screen[0];
        out.push(OverlayPrimitive::Callout {
            x: sx,
            y: sy,
            text: "Start".to_string(),
            color: LABEL_COLOR,
        });
        if screen.len() > 1 {
            let (ex, ey) = screen[screen.len() - 1];
            out.push(OverlayPrimitive::Callout {
                x: ex,
                y: ey,
                text: "End".to_string(),
                color: LABEL_COLOR,
            });
        }

        if let Some((_, point)) = self.highlighted() {
            if let (Ok((x, y)), Some(text)) = (viewport.to_screen(&point), self.tooltip()) {
                out.push(OverlayPrimitive::Point {
                    x,
                    y,
                    radius: 5.0,
                    color: HIGHLIGHT_COLOR,
                });
                out.push(OverlayPrimitive::Callout {
                    x,
                    y,
                    text,
                    color: HIGHLIGHT_COLOR,
                });
            }
        }
    }
}
