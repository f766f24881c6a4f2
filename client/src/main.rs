//! Render one map view to a PNG file

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::{Pixel, Rgba, RgbaImage};
use log::{info, warn};
use web_time::Instant;

use geomap_client::map::loader;
use geomap_client::map::overlay::{OverlayPrimitive, RenderSink, ScreenRect};
use geomap_client::{GeoPoint, MapConfig, MapError, MapSurface};

#[derive(Parser, Debug)]
#[command(name = "geomap", about = "Render a slippy map view to an image")]
struct Args {
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    #[arg(long)]
    zoom: u8,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for tiles before writing what is there
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[arg(long)]
    out: PathBuf,
}

/// Rasterizes the composite and the geometric overlays into one image
struct PngSink {
    canvas: RgbaImage,
}

impl PngSink {
    fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
        }
    }

    fn plot(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        if x < 0 || y < 0 || x >= self.canvas.width() as i64 || y >= self.canvas.height() as i64 {
            return;
        }
        self.canvas.get_pixel_mut(x as u32, y as u32).blend(&color);
    }

    fn disc(&mut self, cx: f64, cy: f64, radius: f64, color: Rgba<u8>) {
        let r = radius.ceil() as i64;
        let (cx_i, cy_i) = (cx.round() as i64, cy.round() as i64);
        for dy in -r..=r {
            for dx in -r..=r {
                if ((dx * dx + dy * dy) as f64) <= radius * radius {
                    self.plot(cx_i + dx, cy_i + dy, color);
                }
            }
        }
    }

    fn segment(&mut self, from: (f64, f64), to: (f64, f64), width: f64, color: Rgba<u8>) {
        let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as i64;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = from.0 + (to.0 - from.0) * t;
            let y = from.1 + (to.1 - from.1) * t;
            self.disc(x, y, width / 2.0, color);
        }
    }

    fn fill(&mut self, rect: ScreenRect, color: Rgba<u8>) {
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                self.plot(x as i64, y as i64, color);
            }
        }
    }
}

impl RenderSink for PngSink {
    fn present(&mut self, composite: &RgbaImage, offset: (i32, i32), overlays: &[OverlayPrimitive]) {
        image::imageops::replace(&mut self.canvas, composite, offset.0 as i64, offset.1 as i64);

        for primitive in overlays {
            match primitive {
                OverlayPrimitive::Point { x, y, radius, color } => self.disc(*x, *y, *radius, *color),
                OverlayPrimitive::Line { points, width, color } => {
                    for pair in points.windows(2) {
                        self.segment(pair[0], pair[1], *width, *color);
                    }
                }
                OverlayPrimitive::SelectionRect { rect, color } => self.fill(*rect, *color),
                OverlayPrimitive::ZoomControl { rect, .. } => self.fill(*rect, Rgba([0, 0, 0, 128])),
                OverlayPrimitive::Callout { x, y, text, .. } => {
                    log::debug!("Label '{}' at ({:.0}, {:.0})", text, x, y);
                }
                OverlayPrimitive::InfoText { text } | OverlayPrimitive::Title { text } => {
                    info!("{}", text);
                }
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.width == 0 || args.height == 0 {
        return Err(MapError::InvalidViewport {
            width: args.width,
            height: args.height,
        }
        .into());
    }

    let config = MapConfig::load(args.config.as_deref())?;
    let center = GeoPoint::new(args.lat, args.lon)?;
    let source = loader::source_from_config(&config)?;

    let mut surface = MapSurface::new(&config, source, center, args.zoom, args.width, args.height)?;
    // Controls would otherwise be drawn into the snapshot
    surface.enable_controls(false);

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let mut idle_polls = 0;
    loop {
        surface.poll();
        let blank = surface.composite().map_or(0, |c| c.blank_tiles);
        if blank == 0 {
            break;
        }
        // Give the last batch callback a moment to land before giving up
        if surface.pending_tiles() == 0 {
            idle_polls += 1;
            if idle_polls > 5 {
                warn!("{} tiles could not be loaded", blank);
                break;
            }
        } else {
            idle_polls = 0;
        }
        if Instant::now() >= deadline {
            warn!("Timed out with {} tiles still loading", surface.pending_tiles());
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    surface.poll();

    let stats = surface.cache_stats();
    info!(
        "Cache: {} tiles ({:.1}% of {}), {:.1}% of memory budget",
        stats.tile_count,
        stats.tile_usage_percent(),
        stats.max_tiles,
        stats.memory_usage_percent()
    );

    let mut sink = PngSink::new(args.width, args.height);
    surface.render(&mut sink);
    sink.canvas
        .save(&args.out)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;
    info!("Wrote {}", args.out.display());
    Ok(())
}
