//! Tile managers: the cache-facing side of batch jobs.
//!
//! A [`TileManager`] owns one tile cache together with the grid it is laid out
//! in and, optionally, the upstream [`TileSource`](crate::source::TileSource)
//! used to fill it. Batch jobs never touch cache storage directly; every
//! load, store and removal goes through this trait.
//!
//! # Concurrency
//!
//! Worker threads call into the same manager concurrently for the whole
//! duration of a job. Implementations must be safe for concurrent
//! `load_tile_coords`, `remove_tile_coords` and `store_tiles` calls.
//!
//! # Implementations
//!
//! - [`MemoryTileManager`] - `dashmap`-backed cache, used for tests and
//!   short-lived processes
//! - [`DiskTileManager`] - `{z}/{x}/{y}.{ext}` file tree

mod disk;
mod memory;

pub use disk::DiskTileManager;
pub use memory::MemoryTileManager;

use std::path::PathBuf;
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

use crate::grid::{GridError, MetaGrid, TileCoord, TileGrid};
use crate::source::SourceError;

/// Errors raised by tile managers.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Reading or writing cache storage failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The upstream source could not deliver a tile.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// A tile coordinate did not fit the manager's grid.
    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    /// The cache does not implement the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A missing tile was requested and no source is configured.
    #[error("tile {0} is not cached and no source is configured")]
    NoSource(TileCoord),
}

/// A single tile with optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub coord: TileCoord,
    /// Encoded image data, `None` when the tile could not be loaded.
    pub data: Option<Bytes>,
    /// When the tile was written to the cache.
    pub timestamp: Option<SystemTime>,
}

impl Tile {
    /// Creates a tile with data.
    pub fn new(coord: TileCoord, data: Bytes) -> Self {
        Self {
            coord,
            data: Some(data),
            timestamp: None,
        }
    }

    /// Creates a tile without data.
    pub fn empty(coord: TileCoord) -> Self {
        Self {
            coord,
            data: None,
            timestamp: None,
        }
    }

    /// Returns true if the tile has no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_none()
    }
}

/// An ordered batch of tiles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileCollection {
    tiles: Vec<Tile>,
}

impl TileCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tile.
    pub fn push(&mut self, tile: Tile) {
        self.tiles.push(tile);
    }

    /// Number of tiles, including empty ones.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Returns true if the collection holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Number of tiles carrying data.
    pub fn loaded(&self) -> usize {
        self.tiles.iter().filter(|t| !t.is_empty()).count()
    }

    /// Iterates over the tiles.
    pub fn iter(&self) -> std::slice::Iter<'_, Tile> {
        self.tiles.iter()
    }

    /// Coordinates of all tiles, in order.
    pub fn coords(&self) -> Vec<TileCoord> {
        self.tiles.iter().map(|t| t.coord).collect()
    }
}

impl From<Vec<Tile>> for TileCollection {
    fn from(tiles: Vec<Tile>) -> Self {
        Self { tiles }
    }
}

impl IntoIterator for TileCollection {
    type Item = Tile;
    type IntoIter = std::vec::IntoIter<Tile>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.into_iter()
    }
}

impl<'a> IntoIterator for &'a TileCollection {
    type Item = &'a Tile;
    type IntoIter = std::slice::Iter<'a, Tile>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.iter()
    }
}

/// Cache operations used by batch jobs.
///
/// Timestamps set through [`set_expire_timestamp`](Self::set_expire_timestamp)
/// decide freshness: a cached tile older than the expire timestamp is stale,
/// and stale tiles do not count as cached.
pub trait TileManager: Send + Sync {
    /// Name of the cache, used to serialize jobs touching the same cache.
    fn cache_name(&self) -> &str;

    /// Grid the cache is laid out in.
    fn grid(&self) -> &TileGrid;

    /// Meta grid used when fetching from the source, if any.
    fn meta_grid(&self) -> Option<&MetaGrid>;

    /// Returns true if tiles are rescaled from other levels.
    ///
    /// Rescaling managers must be seeded tile by tile, not per meta-tile.
    fn rescale_tiles(&self) -> bool;

    /// Loads tiles, fetching and caching missing or stale ones from the source.
    fn load_tile_coords(&self, coords: &[TileCoord]) -> Result<TileCollection, ManagerError>;

    /// Removes tiles from the cache. Returns the number of removed tiles.
    fn remove_tile_coords(&self, coords: &[TileCoord]) -> Result<usize, ManagerError>;

    /// Stores tiles carrying data. Returns the number of stored tiles.
    fn store_tiles(&self, tiles: &TileCollection) -> Result<usize, ManagerError>;

    /// Returns true if the tile is cached and not stale.
    fn is_cached(&self, coord: TileCoord) -> bool;

    /// Returns true if the tile is cached but older than the expire timestamp.
    fn is_stale(&self, coord: TileCoord) -> bool;

    /// Sets the timestamp before which cached tiles are considered stale.
    fn set_expire_timestamp(&self, timestamp: Option<SystemTime>);

    /// When true, only the requested tiles are fetched instead of whole meta-tiles.
    fn set_minimize_meta_requests(&self, minimize: bool);

    /// Releases resources held open between calls (connections, handles).
    ///
    /// Returns true when there was nothing to release or release succeeded.
    fn cleanup(&self) -> bool;

    /// Returns true if [`remove_level_tiles_before`](Self::remove_level_tiles_before)
    /// is implemented.
    fn supports_level_removal(&self) -> bool {
        false
    }

    /// Removes every tile of `level` older than `before` without enumerating
    /// coordinates.
    fn remove_level_tiles_before(&self, level: u8, _before: SystemTime) -> Result<usize, ManagerError> {
        Err(ManagerError::Unsupported(format!(
            "{} cannot remove level {} tiles",
            self.cache_name(),
            level
        )))
    }
}

/// Returns the meta-tile origin containing `coord`, or `coord` itself without
/// a meta grid.
pub(crate) fn meta_origin(meta_grid: Option<&MetaGrid>, coord: TileCoord) -> Result<TileCoord, GridError> {
    match meta_grid {
        None => Ok(coord),
        Some(meta) => {
            let (mw, mh) = meta.meta_size(coord.z)?;
            Ok(TileCoord::new(coord.x - coord.x % mw, coord.y - coord.y % mh, coord.z))
        }
    }
}

/// Returns true if a tile written at `written` is older than `expire`.
pub(crate) fn is_expired(written: Option<SystemTime>, expire: Option<SystemTime>) -> bool {
    match (written, expire) {
        (Some(written), Some(expire)) => written < expire,
        (None, Some(_)) => true,
        (_, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_collection_counts() {
        let mut tiles = TileCollection::new();
        tiles.push(Tile::new(TileCoord::new(0, 0, 1), Bytes::from_static(b"a")));
        tiles.push(Tile::empty(TileCoord::new(1, 0, 1)));
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles.loaded(), 1);
        assert_eq!(
            tiles.coords(),
            vec![TileCoord::new(0, 0, 1), TileCoord::new(1, 0, 1)]
        );
    }

    #[test]
    fn test_meta_origin() {
        let meta = MetaGrid::new(TileGrid::global_geodetic(), (2, 2));
        assert_eq!(
            meta_origin(Some(&meta), TileCoord::new(3, 1, 2)).unwrap(),
            TileCoord::new(2, 0, 2)
        );
        assert_eq!(
            meta_origin(None, TileCoord::new(3, 1, 2)).unwrap(),
            TileCoord::new(3, 1, 2)
        );
    }

    #[test]
    fn test_is_expired() {
        let now = SystemTime::now();
        let hour_ago = now - Duration::from_secs(3600);
        assert!(is_expired(Some(hour_ago), Some(now)));
        assert!(!is_expired(Some(now), Some(hour_ago)));
        assert!(!is_expired(Some(hour_ago), None));
        assert!(is_expired(None, Some(now)));
    }
}
