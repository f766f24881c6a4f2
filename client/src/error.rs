//! Error types for the map viewer

use std::path::PathBuf;
use thiserror::Error;

/// Out-of-domain geographic or projection input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("latitude {0} is beyond the Mercator projection limit")]
    BeyondProjection(f64),

    #[error("zoom level {zoom} is outside [{min}, {max}]")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    #[error("pixel ({x}, {y}) lies outside the world at zoom {zoom}")]
    PixelOutOfRange { x: f64, y: f64, zoom: u8 },

    #[error("coordinate is not a finite number")]
    NotFinite,
}

/// Tile or history retrieval failure
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cannot decode tile image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading and validation failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("viewport {width}x{height} has no area")]
    InvalidViewport { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, MapError>;
