//! LRU tile cache for decoded tile images

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use image::{Rgba, RgbaImage};
use web_time::Instant;

use super::tile::{TileKey, TileSet};

/// Fill for viewport areas with no resident tile
pub const BACKGROUND: Rgba<u8> = Rgba([166, 250, 255, 255]);

/// Cached tile with decoded pixels
pub struct CachedTile {
    pub image: RgbaImage,
    pub memory_size: usize,
    pub loaded_at: Instant,
}

impl CachedTile {
    pub fn new(image: RgbaImage) -> Self {
        let memory_size = tile_memory_size(image.width(), image.height());
        Self {
            image,
            memory_size,
            loaded_at: Instant::now(),
        }
    }
}

/// Calculate memory size for a decoded tile
pub fn tile_memory_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4 // RGBA8 = 4 bytes per pixel
}

struct CacheState {
    tiles: HashMap<TileKey, Arc<CachedTile>>,
    access_order: Vec<TileKey>,
    current_memory: usize,
    /// Keys of the view being shown; never evicted
    pinned: HashSet<TileKey>,
}

/// Map image assembled from whatever tiles were resident
pub struct Composite {
    pub image: RgbaImage,
    /// Grid cells with a valid tile key that had nothing to draw
    pub blank_tiles: usize,
    pub generation: u64,
}

/// LRU cache for map tiles, shared between the UI thread and loader workers.
///
/// The lock is held for one lookup or one insert at a time and never
/// while a tile is being fetched or composited.
pub struct TileCache {
    state: Mutex<CacheState>,
    max_tiles: usize,
    max_memory: usize,
}

impl TileCache {
    /// Create a new tile cache
    /// - max_tiles: Maximum number of tiles to cache (e.g., 256)
    /// - max_memory: Maximum decoded memory in bytes (e.g., 64MB)
    pub fn new(max_tiles: usize, max_memory: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                tiles: HashMap::with_capacity(max_tiles),
                access_order: Vec::with_capacity(max_tiles),
                current_memory: 0,
                pinned: HashSet::new(),
            }),
            max_tiles,
            max_memory,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Protect the tiles of the current view from eviction, replacing any
    /// earlier pins. While the pinned set is larger than the bound the
    /// cache grows past it instead of dropping tiles the view still needs.
    pub fn pin(&self, keys: impl IntoIterator<Item = TileKey>) {
        self.lock().pinned = keys.into_iter().collect();
    }

    /// Check if tile exists in cache
    pub fn contains(&self, key: &TileKey) -> bool {
        self.lock().tiles.contains_key(key)
    }

    /// Get a tile from cache, updating access order
    pub fn get(&self, key: &TileKey) -> Option<Arc<CachedTile>> {
        let mut state = self.lock();
        let tile = state.tiles.get(key).cloned()?;
        if let Some(pos) = state.access_order.iter().position(|k| k == key) {
            state.access_order.remove(pos);
            state.access_order.push(*key);
        }
        Some(tile)
    }

    /// Get a tile without updating access order (for read-only checks)
    pub fn peek(&self, key: &TileKey) -> Option<Arc<CachedTile>> {
        self.lock().tiles.get(key).cloned()
    }

    /// Insert a new tile into cache, evicting old tiles if necessary
    pub fn insert(&self, key: TileKey, tile: CachedTile) {
        let memory_size = tile.memory_size;
        let mut state = self.lock();

        // Remove if already exists (update case)
        if let Some(old) = state.tiles.remove(&key) {
            state.current_memory -= old.memory_size;
            state.access_order.retain(|k| k != &key);
        }

        while self.should_evict(&state, memory_size) {
            if !Self::evict_oldest(&mut state) {
                break;
            }
        }

        state.current_memory += memory_size;
        state.tiles.insert(key, Arc::new(tile));
        state.access_order.push(key);
    }

    fn should_evict(&self, state: &CacheState, new_tile_memory: usize) -> bool {
        !state.tiles.is_empty()
            && (state.tiles.len() >= self.max_tiles
                || state.current_memory + new_tile_memory > self.max_memory)
    }

    /// Evict the least recently used tile that is not pinned
    fn evict_oldest(state: &mut CacheState) -> bool {
        let Some(pos) = state
            .access_order
            .iter()
            .position(|k| !state.pinned.contains(k))
        else {
            return false;
        };
        let oldest = state.access_order.remove(pos);
        match state.tiles.remove(&oldest) {
            Some(tile) => {
                state.current_memory -= tile.memory_size;
                log::debug!("Evicted tile {:?}", oldest);
                true
            }
            None => false,
        }
    }

    /// Remove a specific tile from cache
    pub fn remove(&self, key: &TileKey) -> Option<Arc<CachedTile>> {
        let mut state = self.lock();
        let tile = state.tiles.remove(key)?;
        state.current_memory -= tile.memory_size;
        state.access_order.retain(|k| k != key);
        Some(tile)
    }

    /// Clear all tiles from cache
    pub fn clear(&self) {
        let mut state = self.lock();
        state.tiles.clear();
        state.access_order.clear();
        state.current_memory = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tiles.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            tile_count: state.tiles.len(),
            max_tiles: self.max_tiles,
            memory_used: state.current_memory,
            max_memory: self.max_memory,
        }
    }

    /// Composite the resident part of a tile set without blocking on I/O.
    ///
    /// Returns the image plus a copy of the set whose missing list names
    /// every distinct key that was not resident.
    pub fn request(&self, tile_set: &TileSet) -> (Composite, TileSet) {
        let mut image = RgbaImage::from_pixel(tile_set.width, tile_set.height, BACKGROUND);
        let mut blank_tiles = 0;
        let mut missing = Vec::new();
        let mut seen = HashSet::new();

        for (index, cell) in tile_set.tiles().iter().enumerate() {
            let Some(key) = cell else {
                continue;
            };
            match self.get(key) {
                Some(tile) => {
                    let (x, y) = tile_set.cell_origin(index);
                    image::imageops::replace(&mut image, &tile.image, x, y);
                }
                None => {
                    blank_tiles += 1;
                    if seen.insert(*key) {
                        missing.push(*key);
                    }
                }
            }
        }

        let composite = Composite {
            image,
            blank_tiles,
            generation: tile_set.generation,
        };
        (composite, tile_set.clone().with_missing(missing))
    }
}

/// Cache statistics for debugging/UI
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub tile_count: usize,
    pub max_tiles: usize,
    pub memory_used: usize,
    pub max_memory: usize,
}

impl CacheStats {
    pub fn memory_usage_percent(&self) -> f32 {
        if self.max_memory == 0 {
            0.0
        } else {
            (self.memory_used as f32 / self.max_memory as f32) * 100.0
        }
    }

    pub fn tile_usage_percent(&self) -> f32 {
        if self.max_tiles == 0 {
            0.0
        } else {
            (self.tile_count as f32 / self.max_tiles as f32) * 100.0
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        // Default: 256 tiles, 64MB max
        Self::new(256, 64 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::camera::Viewport;
    use crate::map::tile::{tile_set_for, GeoPoint, TILE_SIZE};

    fn solid(color: [u8; 4]) -> CachedTile {
        CachedTile::new(RgbaImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgba(color)))
    }

    fn tile_set() -> TileSet {
        let center = GeoPoint::new(40.0, -75.0).unwrap();
        tile_set_for(&Viewport::new(center, 10, 800, 600)).unwrap()
    }

    #[test]
    fn test_lru_eviction_by_count() {
        let cache = TileCache::new(2, usize::MAX);
        let a = TileKey::new(3, 0, 0);
        let b = TileKey::new(3, 1, 0);
        let c = TileKey::new(3, 2, 0);
        cache.insert(a, solid([1, 0, 0, 255]));
        cache.insert(b, solid([2, 0, 0, 255]));
        assert!(cache.get(&a).is_some());
        cache.insert(c, solid([3, 0, 0, 255]));

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_pinned_view_survives_small_bound() {
        let set = tile_set();
        let keys = set.keys();
        assert!(keys.len() > 4);

        let cache = TileCache::new(4, usize::MAX);
        cache.pin(keys.iter().copied());
        for key in &keys {
            cache.insert(*key, solid([9, 9, 9, 255]));
        }
        let (composite, requested) = cache.request(&set);
        assert_eq!(requested.missing_count(), 0);
        assert_eq!(composite.blank_tiles, 0);

        // Once the view moves on, the old tiles become evictable again
        let elsewhere = TileKey::new(3, 0, 0);
        cache.pin([elsewhere]);
        cache.insert(elsewhere, solid([1, 1, 1, 255]));
        assert_eq!(cache.len(), 4);
        assert!(cache.contains(&elsewhere));
    }

    #[test]
    fn test_stats_percentages() {
        let cache = TileCache::new(4, 2 * tile_memory_size(TILE_SIZE, TILE_SIZE));
        cache.insert(TileKey::new(3, 0, 0), solid([1, 2, 3, 255]));
        let stats = cache.stats();
        assert_eq!(stats.tile_count, 1);
        assert_eq!(stats.tile_usage_percent(), 25.0);
        assert_eq!(stats.memory_usage_percent(), 50.0);
    }

    #[test]
    fn test_eviction_by_memory() {
        let one_tile = tile_memory_size(TILE_SIZE, TILE_SIZE);
        let cache = TileCache::new(100, one_tile * 2);
        for x in 0..3 {
            cache.insert(TileKey::new(4, x, 0), solid([0, 0, 0, 255]));
        }
        let stats = cache.stats();
        assert_eq!(stats.tile_count, 2);
        assert_eq!(stats.memory_used, one_tile * 2);
        assert!((stats.memory_usage_percent() - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_reinsert_replaces_without_leaking_memory() {
        let cache = TileCache::new(10, usize::MAX);
        let key = TileKey::new(5, 1, 1);
        cache.insert(key, solid([0, 0, 0, 255]));
        cache.insert(key, solid([9, 9, 9, 255]));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().memory_used, tile_memory_size(TILE_SIZE, TILE_SIZE));
        assert_eq!(cache.peek(&key).unwrap().image.get_pixel(0, 0), &Rgba([9, 9, 9, 255]));
        assert!(cache.remove(&key).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_request_reports_missing_and_blank() {
        let cache = TileCache::default();
        let set = tile_set();
        let keys = set.keys();
        cache.insert(keys[0], solid([10, 20, 30, 255]));

        let (composite, missing) = cache.request(&set);
        assert_eq!(missing.missing_count(), keys.len() - 1);
        assert!(!missing.missing().contains(&keys[0]));
        assert_eq!(composite.blank_tiles, keys.len() - 1);
        assert_eq!((composite.image.width(), composite.image.height()), (800, 600));
    }

    #[test]
    fn test_request_is_idempotent() {
        let cache = TileCache::default();
        let set = tile_set();
        cache.insert(set.keys()[2], solid([0, 0, 0, 255]));
        let (_, first) = cache.request(&set);
        let (_, second) = cache.request(&set);
        assert_eq!(first.missing(), second.missing());
    }

    #[test]
    fn test_request_draws_tiles_at_offsets() {
        let cache = TileCache::default();
        let set = tile_set();
        for key in set.keys() {
            cache.insert(key, solid([200, 100, 50, 255]));
        }
        let (composite, missing) = cache.request(&set);
        assert_eq!(missing.missing_count(), 0);
        assert_eq!(composite.blank_tiles, 0);
        assert_eq!(composite.image.get_pixel(0, 0), &Rgba([200, 100, 50, 255]));
        assert_eq!(composite.image.get_pixel(799, 599), &Rgba([200, 100, 50, 255]));
    }
}
