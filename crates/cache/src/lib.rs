//! Bounded two-generation cache of rendered tiles.
//!
//! Tiles requested during the current loading pass live in the *active*
//! generation; when a new pass begins, active tiles rotate into the
//! *passive* generation and become the first eviction candidates. A tile
//! that is re-requested is promoted back to active instead of being
//! re-rendered. Page thumbnails live in a small separate FIFO store so a
//! low-resolution image of every visible page survives even while its
//! full-resolution tiles are still loading.

use image::DynamicImage;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use tileview_engine::RelBounds;

/// Cache identity of a tile: page index plus the page-relative bounds it
/// covers. The thumbnail flag rides along for routing but does not take
/// part in equality — a thumbnail and a full-page tile of the same page
/// cover the same bounds and must not coexist in one store.
#[derive(Debug, Clone, Copy)]
pub struct TileKey {
    pub page: u32,
    pub bounds: RelBounds,
    pub thumbnail: bool,
}

impl TileKey {
    pub fn new(page: u32, bounds: RelBounds) -> Self {
        Self { page, bounds, thumbnail: false }
    }

    pub fn thumbnail(page: u32) -> Self {
        Self { page, bounds: RelBounds::FULL, thumbnail: true }
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page && self.bounds == other.bounds
    }
}

impl Eq for TileKey {}

impl std::hash::Hash for TileKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.page.hash(state);
        self.bounds.hash(state);
    }
}

/// A rendered tile. The bitmap is owned by the tile and therefore by
/// whichever cache slot currently holds it; eviction drops the tile and
/// frees the bitmap with it.
#[derive(Debug)]
pub struct Tile {
    pub key: TileKey,
    pub bitmap: DynamicImage,
    /// Priority assigned by the loading pass that requested this tile.
    /// Lower is fresher: rendered earlier and evicted later.
    pub cache_order: u32,
    pub best_quality: bool,
}

impl Tile {
    pub fn new(key: TileKey, bitmap: DynamicImage, cache_order: u32, best_quality: bool) -> Self {
        Self { key, bitmap, cache_order, best_quality }
    }
}

/// Which generation currently holds a tile. Mostly useful to tests and
/// instrumentation; the display layer iterates both via `for_each_tile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileLocation {
    Active,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of tiles across both generations.
    pub capacity: usize,
    /// Maximum number of page thumbnails.
    pub thumbnail_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 120, thumbnail_capacity: 8 }
    }
}

/// Counters describing cache behavior, for tests and instrumentation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub duplicates_discarded: u64,
    pub tile_count: usize,
    pub thumbnail_count: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Ordering key inside a generation: cache order first, then a globally
/// monotone sequence number so equal orders stay distinct.
type OrderKey = (u32, u64);

#[derive(Debug, Default)]
struct Generation {
    by_order: BTreeMap<OrderKey, Tile>,
    index: HashMap<TileKey, OrderKey>,
}

impl Generation {
    fn len(&self) -> usize {
        self.by_order.len()
    }

    fn contains(&self, key: &TileKey) -> bool {
        self.index.contains_key(key)
    }

    fn insert(&mut self, tile: Tile, seq: u64) {
        let order_key = (tile.cache_order, seq);
        self.index.insert(tile.key, order_key);
        self.by_order.insert(order_key, tile);
    }

    fn remove(&mut self, key: &TileKey) -> Option<Tile> {
        let order_key = self.index.remove(key)?;
        self.by_order.remove(&order_key)
    }

    /// Remove and return the weakest-priority tile (largest cache order).
    fn pop_weakest(&mut self) -> Option<Tile> {
        let (_, tile) = self.by_order.pop_last()?;
        self.index.remove(&tile.key);
        Some(tile)
    }

    fn clear(&mut self) {
        self.by_order.clear();
        self.index.clear();
    }
}

#[derive(Debug, Default)]
struct TileStore {
    active: Generation,
    passive: Generation,
    seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    duplicates_discarded: u64,
}

impl TileStore {
    fn len(&self) -> usize {
        self.active.len() + self.passive.len()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[derive(Debug, Default)]
struct ThumbnailStore {
    parts: VecDeque<Tile>,
    evictions: u64,
    duplicates_discarded: u64,
}

/// Thread-safe tile cache shared by the interactive thread (promote,
/// display iteration) and the render worker's delivery path (insert).
/// The tile generations and the thumbnail store are guarded separately,
/// matching their independent lifecycles.
pub struct TileCache {
    config: CacheConfig,
    tiles: Mutex<TileStore>,
    thumbnails: Mutex<ThumbnailStore>,
}

impl TileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            tiles: Mutex::new(TileStore::default()),
            thumbnails: Mutex::new(ThumbnailStore::default()),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Cache probe for one tile of the current loading pass.
    ///
    /// On a hit the tile is moved to the active generation carrying the
    /// pass's `cache_order` (a tile already in active keeps the order it
    /// got earlier this pass) and the caller must not re-render it. On a
    /// miss the caller enqueues a render request.
    pub fn promote_or_miss(&self, key: &TileKey, cache_order: u32) -> bool {
        let mut store = self.tiles.lock().unwrap();

        if let Some(mut tile) = store.passive.remove(key) {
            tile.cache_order = cache_order;
            let seq = store.next_seq();
            store.active.insert(tile, seq);
            store.hits += 1;
            return true;
        }

        if store.active.contains(key) {
            store.hits += 1;
            return true;
        }

        store.misses += 1;
        false
    }

    /// Insert a freshly rendered tile into the active generation.
    ///
    /// A tile whose key is already cached in either generation is dropped
    /// (freeing the new bitmap) and the cache is left unchanged. Otherwise
    /// weakest-priority tiles are evicted — passive generation first —
    /// until the configured capacity holds.
    pub fn insert(&self, tile: Tile) {
        let mut store = self.tiles.lock().unwrap();

        if store.active.contains(&tile.key) || store.passive.contains(&tile.key) {
            store.duplicates_discarded += 1;
            return;
        }

        while store.len() >= self.config.capacity {
            let evicted = store.passive.pop_weakest().or_else(|| store.active.pop_weakest());
            if evicted.is_none() {
                break;
            }
            store.evictions += 1;
        }

        let seq = store.next_seq();
        store.active.insert(tile, seq);
    }

    /// Rotate generations at the start of a loading pass: everything still
    /// in active joins passive and becomes an eviction candidate unless it
    /// is re-requested (promoted) this pass.
    pub fn begin_new_pass(&self) {
        let mut store = self.tiles.lock().unwrap();

        let active = std::mem::take(&mut store.active);
        for (order_key, tile) in active.by_order {
            store.passive.index.insert(tile.key, order_key);
            store.passive.by_order.insert(order_key, tile);
        }
    }

    /// Insert a page thumbnail, evicting the oldest one beyond capacity.
    /// Duplicate keys are dropped like in `insert`.
    pub fn insert_thumbnail(&self, tile: Tile) {
        let mut store = self.thumbnails.lock().unwrap();

        if store.parts.iter().any(|existing| existing.key == tile.key) {
            store.duplicates_discarded += 1;
            return;
        }

        while store.parts.len() >= self.config.thumbnail_capacity {
            store.parts.pop_front();
            store.evictions += 1;
        }

        store.parts.push_back(tile);
    }

    pub fn contains_thumbnail(&self, page: u32) -> bool {
        let key = TileKey::thumbnail(page);
        let store = self.thumbnails.lock().unwrap();
        store.parts.iter().any(|tile| tile.key == key)
    }

    /// Where a tile currently lives, if cached at all.
    pub fn location(&self, key: &TileKey) -> Option<TileLocation> {
        let store = self.tiles.lock().unwrap();
        if store.active.contains(key) {
            Some(TileLocation::Active)
        } else if store.passive.contains(key) {
            Some(TileLocation::Passive)
        } else {
            None
        }
    }

    /// Visit every cached tile under the lock, passive generation first,
    /// each generation in cache-order. Bitmaps never leave their slot; the
    /// display layer draws from inside the closure.
    pub fn for_each_tile(&self, mut f: impl FnMut(&Tile)) {
        let store = self.tiles.lock().unwrap();
        for tile in store.passive.by_order.values() {
            f(tile);
        }
        for tile in store.active.by_order.values() {
            f(tile);
        }
    }

    /// Visit every cached thumbnail under the lock, oldest first.
    pub fn for_each_thumbnail(&self, mut f: impl FnMut(&Tile)) {
        let store = self.thumbnails.lock().unwrap();
        for tile in &store.parts {
            f(tile);
        }
    }

    /// Number of tiles across both generations (thumbnails excluded).
    pub fn len(&self) -> usize {
        self.tiles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn thumbnail_len(&self) -> usize {
        self.thumbnails.lock().unwrap().parts.len()
    }

    /// Drop every cached bitmap. Used on document recycle.
    pub fn clear(&self) {
        {
            let mut store = self.tiles.lock().unwrap();
            store.active.clear();
            store.passive.clear();
        }
        let mut store = self.thumbnails.lock().unwrap();
        store.parts.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let tiles = self.tiles.lock().unwrap();
        let thumbnails = self.thumbnails.lock().unwrap();
        CacheStats {
            hits: tiles.hits,
            misses: tiles.misses,
            evictions: tiles.evictions + thumbnails.evictions,
            duplicates_discarded: tiles.duplicates_discarded + thumbnails.duplicates_discarded,
            tile_count: tiles.len(),
            thumbnail_count: thumbnails.parts.len(),
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
