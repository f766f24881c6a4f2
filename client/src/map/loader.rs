//! Asynchronous tile loader with a worker pool and in-flight deduplication

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use image::RgbaImage;
use log::debug;
use web_time::Instant;

use super::cache::{CachedTile, TileCache};
use super::tile::{TileKey, TileSet};
#[cfg(not(target_arch = "wasm32"))]
use crate::config::MapConfig;
use crate::error::FetchError;

/// Where tile images come from
pub trait TileSource: Send + Sync {
    fn fetch_tile(&self, key: TileKey) -> Result<Vec<u8>, FetchError>;
}

impl<S: TileSource + ?Sized> TileSource for Arc<S> {
    fn fetch_tile(&self, key: TileKey) -> Result<Vec<u8>, FetchError> {
        (**self).fetch_tile(key)
    }
}

/// Tile server reached over HTTP, e.g. OpenStreetMap
#[cfg(not(target_arch = "wasm32"))]
pub struct HttpTileSource {
    client: reqwest::blocking::Client,
    url_template: String,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpTileSource {
    pub fn new(url_template: &str, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url_template: url_template.to_string(),
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl TileSource for HttpTileSource {
    fn fetch_tile(&self, key: TileKey) -> Result<Vec<u8>, FetchError> {
        let url = key.to_url(&self.url_template);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Http {
                status: response.status().as_u16(),
                url,
            });
        }

        let bytes = response
            .bytes()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Keeps a copy of every fetched tile under `dir/z/x/y.png`
pub struct DiskCachedSource<S> {
    inner: S,
    dir: PathBuf,
}

impl<S: TileSource> DiskCachedSource<S> {
    pub fn new(inner: S, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    /// Create the cache directory up front so a bad path fails at startup
    pub fn open(inner: S, dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self::new(inner, dir))
    }

    pub fn tile_path(&self, key: TileKey) -> PathBuf {
        self.dir
            .join(key.zoom.to_string())
            .join(key.x.to_string())
            .join(format!("{}.png", key.y))
    }

    fn store(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }
}

impl<S: TileSource> TileSource for DiskCachedSource<S> {
    fn fetch_tile(&self, key: TileKey) -> Result<Vec<u8>, FetchError> {
        let path = self.tile_path(key);
        match fs::read(&path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Cannot read cached tile {}: {}", path.display(), e),
        }

        let bytes = self.inner.fetch_tile(key)?;
        if let Err(e) = Self::store(&path, &bytes) {
            log::warn!("Cannot store tile {}: {}", path.display(), e);
        }
        Ok(bytes)
    }
}

/// HTTP source from the configured template, disk-cached when a directory is set
#[cfg(not(target_arch = "wasm32"))]
pub fn source_from_config(config: &MapConfig) -> Result<Arc<dyn TileSource>, FetchError> {
    let http = HttpTileSource::new(&config.tile_url, &config.user_agent)?;
    Ok(match &config.cache.disk_dir {
        Some(dir) => Arc::new(DiskCachedSource::open(http, dir.clone())?),
        None => Arc::new(http),
    })
}

/// Decode tile bytes into RGBA pixels
pub fn decode_tile_image(data: &[u8]) -> Result<RgbaImage, image::ImageError> {
    let img = image::load_from_memory(data)?;
    Ok(img.to_rgba8())
}

/// What happened to each tile of a `fetch_missing` batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub tile_set: TileSet,
    pub loaded: Vec<TileKey>,
    /// Download or decode failed; stays blank until the next request cycle
    pub failed: Vec<TileKey>,
    /// Skipped because every requester had been superseded
    pub cancelled: Vec<TileKey>,
}

impl BatchReport {
    pub fn generation(&self) -> u64 {
        self.tile_set.generation
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TileOutcome {
    Loaded,
    Failed,
    Cancelled,
}

type Callback = Box<dyn FnOnce(BatchReport) + Send>;

struct BatchState {
    remaining: usize,
    report: Option<BatchReport>,
    callback: Option<Callback>,
}

/// One `fetch_missing` call waiting for its tiles
struct Batch {
    generation: u64,
    state: Mutex<BatchState>,
}

impl Batch {
    fn new(tile_set: TileSet, remaining: usize, callback: Callback) -> Self {
        Self {
            generation: tile_set.generation,
            state: Mutex::new(BatchState {
                remaining,
                report: Some(BatchReport {
                    tile_set,
                    loaded: Vec::new(),
                    failed: Vec::new(),
                    cancelled: Vec::new(),
                }),
                callback: Some(callback),
            }),
        }
    }

    /// Record one tile; the last one fires the callback outside the lock
    fn settle(&self, key: Option<TileKey>, outcome: TileOutcome) {
        let finished = {
            let mut state = lock(&self.state);
            if let (Some(key), Some(report)) = (key, state.report.as_mut()) {
                match outcome {
                    TileOutcome::Loaded => report.loaded.push(key),
                    TileOutcome::Failed => report.failed.push(key),
                    TileOutcome::Cancelled => report.cancelled.push(key),
                }
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                state.report.take().zip(state.callback.take())
            } else {
                None
            }
        };

        if let Some((report, callback)) = finished {
            callback(report);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    cache: Arc<TileCache>,
    source: Arc<dyn TileSource>,
    in_flight: Mutex<HashMap<TileKey, Vec<Arc<Batch>>>>,
    latest_generation: AtomicU64,
}

impl Shared {
    /// Take the waiters for `key` if none of them is current any more
    fn take_if_superseded(&self, key: &TileKey) -> Option<Vec<Arc<Batch>>> {
        let latest = self.latest_generation.load(Ordering::Acquire);
        let mut in_flight = lock(&self.in_flight);
        let stale = in_flight
            .get(key)
            .is_some_and(|waiters| waiters.iter().all(|b| b.generation < latest));
        if stale { in_flight.remove(key) } else { None }
    }

    fn load(&self, key: TileKey) -> TileOutcome {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.source
                .fetch_tile(key)
                .and_then(|bytes| decode_tile_image(&bytes).map_err(FetchError::from))
        }));

        match result {
            Ok(Ok(image)) => {
                self.cache.insert(key, CachedTile::new(image));
                debug!("Loaded tile {:?} in {:?}", key, started.elapsed());
                TileOutcome::Loaded
            }
            Ok(Err(e)) => {
                log::warn!("Failed to load tile {:?}: {}", key, e);
                TileOutcome::Failed
            }
            Err(_) => {
                log::error!("Tile source panicked while fetching {:?}", key);
                TileOutcome::Failed
            }
        }
    }
}

/// Fetches missing tiles on background threads and fills the shared cache
pub struct TileLoader {
    shared: Arc<Shared>,
    request_tx: Option<Sender<TileKey>>,
    workers: Vec<JoinHandle<()>>,
}

impl TileLoader {
    /// Create a new tile loader with `workers` fetch threads (at least one)
    pub fn new(cache: Arc<TileCache>, source: Arc<dyn TileSource>, workers: usize) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<TileKey>();
        let request_rx = Arc::new(Mutex::new(request_rx));
        let shared = Arc::new(Shared {
            cache,
            source,
            in_flight: Mutex::new(HashMap::new()),
            latest_generation: AtomicU64::new(0),
        });

        let workers = (0..workers.max(1))
            .filter_map(|index| {
                let shared = Arc::clone(&shared);
                let request_rx = Arc::clone(&request_rx);
                thread::Builder::new()
                    .name(format!("tile-worker-{}", index))
                    .spawn(move || Self::worker_thread(shared, request_rx))
                    .map_err(|e| log::error!("Cannot spawn tile worker: {}", e))
                    .ok()
            })
            .collect();

        Self {
            shared,
            request_tx: Some(request_tx),
            workers,
        }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.shared.cache
    }

    /// Fetch every missing tile of `tile_set` in the background.
    ///
    /// `on_ready` runs once, on whichever thread settles the last tile,
    /// after all tiles are resident, failed or cancelled. Tiles already being
    /// fetched for another batch are shared rather than fetched twice.
    pub fn fetch_missing<F>(&self, tile_set: TileSet, on_ready: F)
    where
        F: FnOnce(BatchReport) + Send + 'static,
    {
        let keys = tile_set.missing().to_vec();
        // One extra count holds the batch open until every key is registered
        let batch = Arc::new(Batch::new(tile_set, keys.len() + 1, Box::new(on_ready)));

        for key in keys {
            let mut in_flight = lock(&self.shared.in_flight);
            if self.shared.cache.contains(&key) {
                drop(in_flight);
                batch.settle(Some(key), TileOutcome::Loaded);
                continue;
            }

            let start_fetch = match in_flight.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(Arc::clone(&batch));
                    false
                }
                None => {
                    in_flight.insert(key, vec![Arc::clone(&batch)]);
                    true
                }
            };

            if start_fetch && !self.send(key) {
                let waiters = in_flight.remove(&key).unwrap_or_default();
                drop(in_flight);
                for waiter in waiters {
                    waiter.settle(Some(key), TileOutcome::Failed);
                }
            }
        }

        batch.settle(None, TileOutcome::Loaded);
    }

    fn send(&self, key: TileKey) -> bool {
        self.request_tx
            .as_ref()
            .is_some_and(|tx| tx.send(key).is_ok())
    }

    /// Mark every batch older than `generation` as no longer wanted
    pub fn supersede(&self, generation: u64) {
        self.shared
            .latest_generation
            .fetch_max(generation, Ordering::AcqRel);
    }

    /// Check if a tile is currently being loaded
    pub fn is_loading(&self, key: &TileKey) -> bool {
        lock(&self.shared.in_flight).contains_key(key)
    }

    /// Get number of tiles queued or being fetched
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.in_flight).len()
    }

    /// Stop accepting work and wait for the workers to finish their current tile
    pub fn shutdown(mut self) {
        self.request_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Tile worker exited with a panic");
            }
        }
    }

    fn worker_thread(shared: Arc<Shared>, request_rx: Arc<Mutex<Receiver<TileKey>>>) {
        loop {
            let next = lock(&request_rx).recv();
            let Ok(key) = next else {
                break; // Loader dropped, exit thread
            };

            let (outcome, waiters) = match shared.take_if_superseded(&key) {
                Some(waiters) => {
                    debug!("Skipping superseded tile {:?}", key);
                    (TileOutcome::Cancelled, waiters)
                }
                None => {
                    let outcome = shared.load(key);
                    let waiters = lock(&shared.in_flight).remove(&key).unwrap_or_default();
                    (outcome, waiters)
                }
            };

            for batch in waiters {
                batch.settle(Some(key), outcome);
            }
        }
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        // Workers exit once the queue drains and the sender is gone
        self.request_tx.take();
    }
}
