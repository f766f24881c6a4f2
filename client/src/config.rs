//! Layered map configuration: defaults, then a TOML file, then environment

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::map::camera::DRAG_JITTER;
use crate::map::history::DEFAULT_HISTORY_MINUTES;
use crate::map::tile::{MAX_ZOOM, MIN_ZOOM};

pub const DEFAULT_TILE_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_USER_AGENT: &str = concat!("geomap/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_tiles: usize,
    pub max_memory_mb: usize,
    /// Keep fetched tiles on disk under `dir/z/x/y.png`
    pub disk_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tiles: 256,
            max_memory_mb: 64,
            disk_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min: u8,
    pub max: u8,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: MIN_ZOOM,
            max: MAX_ZOOM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub tile_url: String,
    pub user_agent: String,
    pub workers: usize,
    pub cache: CacheConfig,
    pub zoom: ZoomConfig,
    pub drag_jitter_px: i32,
    pub hover_radius_px: i32,
    pub history_minutes: i64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            tile_url: DEFAULT_TILE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            workers: 4,
            cache: CacheConfig::default(),
            zoom: ZoomConfig::default(),
            drag_jitter_px: DRAG_JITTER,
            hover_radius_px: 5,
            history_minutes: DEFAULT_HISTORY_MINUTES,
        }
    }
}

impl MapConfig {
    /// Defaults, overridden by `path` if given, overridden by the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        let config = config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file; keys it omits keep their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load_from_env(self) -> Self {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `GEOMAP_*` overrides looked up through `lookup`.
    /// Unparsable values are logged and ignored.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GEOMAP_TILE_URL") {
            self.tile_url = url;
        }

        if let Some(agent) = lookup("GEOMAP_USER_AGENT") {
            self.user_agent = agent;
        }

        if let Some(value) = lookup("GEOMAP_WORKERS") {
            match value.parse::<usize>() {
                Ok(workers) => self.workers = workers,
                Err(_) => log::warn!("Invalid GEOMAP_WORKERS value '{}': expected a positive integer", value),
            }
        }

        if let Some(value) = lookup("GEOMAP_CACHE_TILES") {
            match value.parse::<usize>() {
                Ok(tiles) => self.cache.max_tiles = tiles,
                Err(_) => log::warn!("Invalid GEOMAP_CACHE_TILES value '{}': expected a tile count", value),
            }
        }

        if let Some(dir) = lookup("GEOMAP_CACHE_DIR") {
            self.cache.disk_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: String| ConfigError::Invalid {
            key: key.to_string(),
            reason,
        };

        if self.zoom.min > self.zoom.max {
            return Err(invalid(
                "zoom.min",
                format!("{} is greater than zoom.max {}", self.zoom.min, self.zoom.max),
            ));
        }
        if self.zoom.max > MAX_ZOOM {
            return Err(invalid("zoom.max", format!("{} exceeds {}", self.zoom.max, MAX_ZOOM)));
        }
        if self.zoom.min < MIN_ZOOM {
            return Err(invalid("zoom.min", format!("{} is below {}", self.zoom.min, MIN_ZOOM)));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "at least one worker is required".to_string()));
        }
        if self.cache.max_tiles == 0 || self.cache.max_memory_mb == 0 {
            return Err(invalid("cache", "capacity must be greater than zero".to_string()));
        }
        if !["{z}", "{x}", "{y}"].iter().all(|p| self.tile_url.contains(p)) {
            return Err(invalid(
                "tile_url",
                format!("'{}' must contain {{z}}, {{x}} and {{y}}", self.tile_url),
            ));
        }
        Ok(())
    }

    pub fn cache_memory_bytes(&self) -> usize {
        self.cache.max_memory_mb.saturating_mul(1024 * 1024)
    }
}
