//! File system tile manager.
//!
//! Tiles are stored as `{root}/{z}/{x}/{y}.{ext}`; the file modification time
//! is the tile timestamp. Writes go to a temporary file that is renamed into
//! place so readers never observe partial tiles.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{is_expired, meta_origin, ManagerError, Tile, TileCollection, TileManager};
use crate::grid::{MetaGrid, TileCoord, TileGrid};
use crate::source::TileSource;

/// Default file extension for cached tiles.
pub const DEFAULT_TILE_EXTENSION: &str = "png";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Tile manager storing tiles in a directory tree.
pub struct DiskTileManager {
    name: String,
    root: PathBuf,
    extension: String,
    grid: TileGrid,
    meta_grid: Option<MetaGrid>,
    source: Option<Arc<dyn TileSource>>,
    expire: RwLock<Option<SystemTime>>,
    minimize_meta_requests: AtomicBool,
}

impl DiskTileManager {
    /// Creates a manager for the cache rooted at `root`.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, grid: TileGrid) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            extension: DEFAULT_TILE_EXTENSION.to_string(),
            grid,
            meta_grid: None,
            source: None,
            expire: RwLock::new(None),
            minimize_meta_requests: AtomicBool::new(false),
        }
    }

    /// Uses `extension` for tile files instead of `png`.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
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

    /// Root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `coord`.
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, self.extension))
    }

    fn modified(&self, coord: TileCoord) -> Option<SystemTime> {
        fs::metadata(self.tile_path(coord))
            .and_then(|m| m.modified())
            .ok()
    }

    fn read(&self, coord: TileCoord) -> Result<Option<Tile>, ManagerError> {
        let path = self.tile_path(coord);
        match fs::read(&path) {
            Ok(data) => Ok(Some(Tile {
                coord,
                data: Some(Bytes::from(data)),
                timestamp: self.modified(coord),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ManagerError::Io { path, source }),
        }
    }

    fn write(&self, coord: TileCoord, data: &[u8]) -> Result<(), ManagerError> {
        let path = self.tile_path(coord);
        let io_err = |source| ManagerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = path.with_extension(format!(
            "{}.tmp{}",
            self.extension,
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let result = fs::File::create(&tmp)
            .and_then(|mut f| f.write_all(data))
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        Ok(())
    }

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

        let mut requested = None;
        for tile in batch {
            let data = source.fetch(tile)?;
            self.write(tile, &data)?;
            trace!(cache = %self.name, tile = %tile, "Fetched and stored tile");
            if tile == coord {
                requested = Some(data);
            }
        }
        requested.ok_or(ManagerError::NoSource(coord))
    }
}

impl TileManager for DiskTileManager {
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
        false
    }

    fn load_tile_coords(&self, coords: &[TileCoord]) -> Result<TileCollection, ManagerError> {
        let mut tiles = TileCollection::new();
        for &coord in coords {
            if self.is_cached(coord) {
                if let Some(tile) = self.read(coord)? {
                    tiles.push(tile);
                    continue;
                }
            }
            let data = self.fetch(coord)?;
            tiles.push(Tile {
                coord,
                data: Some(data),
                timestamp: self.modified(coord),
            });
        }
        Ok(tiles)
    }

    fn remove_tile_coords(&self, coords: &[TileCoord]) -> Result<usize, ManagerError> {
        let mut removed = 0;
        for &coord in coords {
            let path = self.tile_path(coord);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(ManagerError::Io { path, source }),
            }
        }
        Ok(removed)
    }

    fn store_tiles(&self, tiles: &TileCollection) -> Result<usize, ManagerError> {
        let mut stored = 0;
        for tile in tiles {
            if let Some(data) = &tile.data {
                self.write(tile.coord, data)?;
                stored += 1;
            }
        }
        Ok(stored)
    }

    fn is_cached(&self, coord: TileCoord) -> bool {
        match self.modified(coord) {
            Some(written) => !is_expired(Some(written), *self.expire.read()),
            None => false,
        }
    }

    fn is_stale(&self, coord: TileCoord) -> bool {
        match self.modified(coord) {
            Some(written) => is_expired(Some(written), *self.expire.read()),
            None => false,
        }
    }

    fn set_expire_timestamp(&self, timestamp: Option<SystemTime>) {
        *self.expire.write() = timestamp;
    }

    fn set_minimize_meta_requests(&self, minimize: bool) {
        self.minimize_meta_requests.store(minimize, Ordering::Relaxed);
    }

    fn cleanup(&self) -> bool {
        true
    }

    fn supports_level_removal(&self) -> bool {
        true
    }

    fn remove_level_tiles_before(&self, level: u8, before: SystemTime) -> Result<usize, ManagerError> {
        let level_dir = self.root.join(level.to_string());
        if !level_dir.exists() {
            return Ok(0);
        }
        let removed = remove_files_before(&level_dir, before)?;
        debug!(cache = %self.name, level, removed, "Removed level tiles");
        Ok(removed)
    }
}

/// Recursively removes regular files under `dir` modified before `before`.
fn remove_files_before(dir: &Path, before: SystemTime) -> Result<usize, ManagerError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ManagerError::Io { path, source }
    };

    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let entry = entry.map_err(io_err(dir))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(io_err(&path))?;
        if meta.is_dir() {
            removed += remove_files_before(&path, before)?;
        } else if meta.modified().map(|m| m < before).unwrap_or(false) {
            fs::remove_file(&path).map_err(io_err(&path))?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use filetime::FileTime;
    use std::time::Duration;
    use tempfile::TempDir;

    struct ConstSource;

    impl TileSource for ConstSource {
        fn fetch(&self, _coord: TileCoord) -> Result<Bytes, SourceError> {
            Ok(Bytes::from_static(b"tile"))
        }
    }

    fn manager(dir: &TempDir) -> DiskTileManager {
        DiskTileManager::new("disk", dir.path(), TileGrid::global_geodetic())
            .with_source(Arc::new(ConstSource))
    }

    fn age(mgr: &DiskTileManager, coord: TileCoord, secs: u64) {
        let t = SystemTime::now() - Duration::from_secs(secs);
        filetime::set_file_mtime(mgr.tile_path(coord), FileTime::from_system_time(t)).unwrap();
    }

    #[test]
    fn test_tile_path_layout() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).with_extension("jpeg");
        assert_eq!(
            mgr.tile_path(TileCoord::new(3, 1, 2)),
            dir.path().join("2").join("3").join("1.jpeg")
        );
    }

    #[test]
    fn test_load_fetches_and_stores() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let coord = TileCoord::new(1, 0, 1);

        assert!(!mgr.is_cached(coord));
        let tiles = mgr.load_tile_coords(&[coord]).unwrap();
        assert_eq!(tiles.loaded(), 1);
        assert!(mgr.is_cached(coord));
        assert_eq!(fs::read(mgr.tile_path(coord)).unwrap(), b"tile");
    }

    #[test]
    fn test_meta_tile_fetch_stores_neighbours() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir).with_meta_size((2, 2));
        mgr.load_tile_coords(&[TileCoord::new(0, 0, 2)]).unwrap();
        for coord in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert!(mgr.is_cached(TileCoord::new(coord.0, coord.1, 2)));
        }
        assert!(!mgr.is_cached(TileCoord::new(2, 0, 2)));
    }

    #[test]
    fn test_stale_tiles() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let coord = TileCoord::new(0, 0, 0);
        mgr.load_tile_coords(&[coord]).unwrap();
        age(&mgr, coord, 7200);

        mgr.set_expire_timestamp(Some(SystemTime::now() - Duration::from_secs(3600)));
        assert!(mgr.is_stale(coord));
        assert!(!mgr.is_cached(coord));
    }

    #[test]
    fn test_remove_tile_coords_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let coord = TileCoord::new(0, 0, 0);
        mgr.load_tile_coords(&[coord]).unwrap();

        let removed = mgr
            .remove_tile_coords(&[coord, TileCoord::new(1, 0, 1)])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!mgr.tile_path(coord).exists());
    }

    #[test]
    fn test_remove_level_tiles_before() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);
        let old = TileCoord::new(0, 0, 1);
        let fresh = TileCoord::new(1, 0, 1);
        mgr.load_tile_coords(&[old, fresh]).unwrap();
        age(&mgr, old, 7200);

        let before = SystemTime::now() - Duration::from_secs(3600);
        let removed = mgr.remove_level_tiles_before(1, before).unwrap();
        assert_eq!(removed, 1);
        assert!(!mgr.tile_path(old).exists());
        assert!(mgr.tile_path(fresh).exists());

        assert_eq!(mgr.remove_level_tiles_before(7, before).unwrap(), 0);
    }
}
