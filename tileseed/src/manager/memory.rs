//! In-memory tile manager backed by `dashmap`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use super::{is_expired, meta_origin, ManagerError, Tile, TileCollection, TileManager};
use crate::grid::{MetaGrid, TileCoord, TileGrid};
use crate::source::TileSource;

#[derive(Debug, Clone)]
struct CachedTile {
    data: Bytes,
    written: SystemTime,
}

/// Tile manager keeping all tiles in memory.
///
/// Missing tiles are fetched from the configured [`TileSource`]. With a meta
/// grid, a miss fetches every tile of the surrounding meta-tile unless meta
/// requests are minimized.
pub struct MemoryTileManager {
    name: String,
    grid: TileGrid,
    meta_grid: Option<MetaGrid>,
    rescale_tiles: bool,
    source: Option<Arc<dyn TileSource>>,
    tiles: DashMap<TileCoord, CachedTile>,
    expire: RwLock<Option<SystemTime>>,
    minimize_meta_requests: AtomicBool,
    fetches: AtomicU64,
    cleanups: AtomicU64,
}

impl MemoryTileManager {
    /// Creates an empty manager without source.
    pub fn new(name: impl Into<String>, grid: TileGrid) -> Self {
        Self {
            name: name.into(),
            grid,
            meta_grid: None,
            rescale_tiles: false,
            source: None,
            tiles: DashMap::new(),
            expire: RwLock::new(None),
            minimize_meta_requests: AtomicBool::new(false),
            fetches: AtomicU64::new(0),
            cleanups: AtomicU64::new(0),
        }
    }

    /// Groups tiles into meta-tiles of `meta_size` when fetching.
    pub fn with_meta_size(mut self, meta_size: (u32, u32)) -> Self {
        self.meta_grid = Some(MetaGrid::new(self.grid.clone(), meta_size));
        self
    }

    /// Fetches missing tiles from `source`.
    pub fn with_source(mut self, source: Arc<dyn TileSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Marks the manager as rescaling tiles from other levels.
    pub fn with_rescale_tiles(mut self, rescale: bool) -> Self {
        self.rescale_tiles = rescale;
        self
    }

    /// Puts a tile into the cache with an explicit write time.
    pub fn insert(&self, coord: TileCoord, data: Bytes, written: SystemTime) {
        self.tiles.insert(coord, CachedTile { data, written });
    }

    /// Returns true if the tile is present, fresh or stale.
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns true if no tile is cached.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// All cached coordinates, sorted.
    pub fn cached_coords(&self) -> Vec<TileCoord> {
        let mut coords: Vec<_> = self.tiles.iter().map(|e| *e.key()).collect();
        coords.sort();
        coords
    }

    /// Number of tiles fetched from the source.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of `cleanup()` calls.
    pub fn cleanup_count(&self) -> u64 {
        self.cleanups.load(Ordering::Relaxed)
    }

    fn expire_timestamp(&self) -> Option<SystemTime> {
        *self.expire.read()
    }

    fn fresh(&self, coord: TileCoord) -> Option<CachedTile> {
        let expire = self.expire_timestamp();
        self.tiles
            .get(&coord)
            .filter(|t| !is_expired(Some(t.written), expire))
            .map(|t| t.value().clone())
    }

    /// Fetches `coord` (and its meta-tile neighbours) from the source.
    fn fetch(&self, coord: TileCoord) -> Result<Bytes, ManagerError> {
        let source = self.source.as_ref().ok_or(ManagerError::NoSource(coord))?;

        let batch = if self.minimize_meta_requests.load(Ordering::Relaxed) {
            vec![coord]
        } else {
            match &self.meta_grid {
                Some(meta) => meta.tile_list(meta_origin(Some(meta), coord)?)?,
                None => vec![coord],
            }
        };

        let now = SystemTime::now();
        let mut requested = None;
        for tile in batch {
            let data = source.fetch(tile)?;
            self.fetches.fetch_add(1, Ordering::Relaxed);
            trace!(cache = %self.name, tile = %tile, "Fetched tile");
            if tile == coord {
                requested = Some(data.clone());
            }
            self.insert(tile, data, now);
        }
        requested.ok_or(ManagerError::NoSource(coord))
    }
}

impl TileManager for MemoryTileManager {
    fn cache_name(&self) -> &str {
        &self.name
    }

    fn grid(&self) -> &TileGrid {
        &self.grid
    }

    fn meta_grid(&self) -> Option<&MetaGrid> {
        self.meta_grid.as_ref()
    }

    fn rescale_tiles(&self) -> bool {
        self.rescale_tiles
    }

    fn load_tile_coords(&self, coords: &[TileCoord]) -> Result<TileCollection, ManagerError> {
        let mut tiles = TileCollection::new();
        for &coord in coords {
            let tile = match self.fresh(coord) {
                Some(cached) => Tile {
                    coord,
                    data: Some(cached.data),
                    timestamp: Some(cached.written),
                },
                None => {
                    let data = self.fetch(coord)?;
                    Tile {
                        coord,
                        data: Some(data),
                        timestamp: Some(SystemTime::now()),
                    }
                }
            };
            tiles.push(tile);
        }
        Ok(tiles)
    }

    fn remove_tile_coords(&self, coords: &[TileCoord]) -> Result<usize, ManagerError> {
        Ok(coords
            .iter()
            .filter(|c| self.tiles.remove(c).is_some())
            .count())
    }

    fn store_tiles(&self, tiles: &TileCollection) -> Result<usize, ManagerError> {
        let now = SystemTime::now();
        let mut stored = 0;
        for tile in tiles {
            if let Some(data) = &tile.data {
                self.insert(tile.coord, data.clone(), tile.timestamp.unwrap_or(now));
                stored += 1;
            }
        }
        Ok(stored)
    }

    fn is_cached(&self, coord: TileCoord) -> bool {
        self.fresh(coord).is_some()
    }

    fn is_stale(&self, coord: TileCoord) -> bool {
        let expire = self.expire_timestamp();
        self.tiles
            .get(&coord)
            .map(|t| is_expired(Some(t.written), expire))
            .unwrap_or(false)
    }

    fn set_expire_timestamp(&self, timestamp: Option<SystemTime>) {
        *self.expire.write() = timestamp;
    }

    fn set_minimize_meta_requests(&self, minimize: bool) {
        self.minimize_meta_requests.store(minimize, Ordering::Relaxed);
    }

    fn cleanup(&self) -> bool {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn supports_level_removal(&self) -> bool {
        true
    }

    fn remove_level_tiles_before(&self, level: u8, before: SystemTime) -> Result<usize, ManagerError> {
        let old = self.tiles.len();
        self.tiles
            .retain(|coord, tile| coord.z != level || tile.written >= before);
        Ok(old - self.tiles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use std::time::Duration;

    struct EchoSource;

    impl TileSource for EchoSource {
        fn fetch(&self, coord: TileCoord) -> Result<Bytes, SourceError> {
            Ok(Bytes::from(coord.to_string()))
        }
    }

    fn manager() -> MemoryTileManager {
        MemoryTileManager::new("test", TileGrid::global_geodetic()).with_source(Arc::new(EchoSource))
    }

    #[test]
    fn test_load_fetches_missing_tiles() {
        let mgr = manager();
        let tiles = mgr.load_tile_coords(&[TileCoord::new(1, 0, 1)]).unwrap();
        assert_eq!(tiles.loaded(), 1);
        assert_eq!(mgr.fetch_count(), 1);
        assert!(mgr.is_cached(TileCoord::new(1, 0, 1)));

        // second load is served from cache
        mgr.load_tile_coords(&[TileCoord::new(1, 0, 1)]).unwrap();
        assert_eq!(mgr.fetch_count(), 1);
    }

    #[test]
    fn test_load_without_source_fails() {
        let mgr = MemoryTileManager::new("test", TileGrid::global_geodetic());
        let result = mgr.load_tile_coords(&[TileCoord::new(0, 0, 0)]);
        assert!(matches!(result, Err(ManagerError::NoSource(_))));
    }

    #[test]
    fn test_meta_tile_fetch() {
        let mgr = manager().with_meta_size((2, 2));
        mgr.load_tile_coords(&[TileCoord::new(3, 1, 2)]).unwrap();
        assert_eq!(mgr.fetch_count(), 4);
        assert!(mgr.is_cached(TileCoord::new(2, 0, 2)));

        mgr.set_minimize_meta_requests(true);
        mgr.load_tile_coords(&[TileCoord::new(0, 0, 2)]).unwrap();
        assert_eq!(mgr.fetch_count(), 5);
    }

    #[test]
    fn test_expire_timestamp_marks_tiles_stale() {
        let mgr = manager();
        let coord = TileCoord::new(0, 0, 0);
        let now = SystemTime::now();
        mgr.insert(coord, Bytes::from_static(b"old"), now - Duration::from_secs(600));

        assert!(mgr.is_cached(coord));
        assert!(!mgr.is_stale(coord));

        mgr.set_expire_timestamp(Some(now));
        assert!(!mgr.is_cached(coord));
        assert!(mgr.is_stale(coord));
        assert!(!mgr.is_stale(TileCoord::new(1, 0, 1)));
    }

    #[test]
    fn test_store_and_remove() {
        let mgr = MemoryTileManager::new("test", TileGrid::global_geodetic());
        let tiles = TileCollection::from(vec![
            Tile::new(TileCoord::new(0, 0, 1), Bytes::from_static(b"a")),
            Tile::empty(TileCoord::new(1, 0, 1)),
        ]);
        assert_eq!(mgr.store_tiles(&tiles).unwrap(), 1);
        assert_eq!(mgr.len(), 1);

        let removed = mgr
            .remove_tile_coords(&[TileCoord::new(0, 0, 1), TileCoord::new(1, 0, 1)])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_remove_level_tiles_before() {
        let mgr = MemoryTileManager::new("test", TileGrid::global_geodetic());
        let now = SystemTime::now();
        let old = now - Duration::from_secs(3600);
        mgr.insert(TileCoord::new(0, 0, 1), Bytes::from_static(b"a"), old);
        mgr.insert(TileCoord::new(1, 0, 1), Bytes::from_static(b"b"), now);
        mgr.insert(TileCoord::new(0, 0, 0), Bytes::from_static(b"c"), old);

        let removed = mgr.remove_level_tiles_before(1, now).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            mgr.cached_coords(),
            vec![TileCoord::new(0, 0, 0), TileCoord::new(1, 0, 1)]
        );
    }
}
