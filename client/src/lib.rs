pub mod config;
pub mod error;
pub mod map;

pub use config::MapConfig;
pub use error::{CoordinateError, FetchError, MapError, Result};
pub use map::camera::{Viewport, ViewportController};
pub use map::tile::{BoundingBox, GeoPoint, TileKey, TileSet};
pub use map::{MapEvent, MapListener, MapSurface};
