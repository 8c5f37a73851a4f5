//! `{z}/{x}/{y}.{ext}` directory archive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::trace;

use super::{ProviderError, TileExporter, TileImporter};
use crate::grid::TileCoord;
use crate::manager::{Tile, TileCollection};

/// Plain directory tree used as export target and import source.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
    extension: String,
}

impl DirectoryArchive {
    /// Opens (or prepares) an archive rooted at `root` with `png` tiles.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: "png".to_string(),
        }
    }

    /// Uses `extension` for tile files.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of `coord` inside the archive.
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, self.extension))
    }
}

impl TileExporter for DirectoryArchive {
    fn store_tile_collection(&self, tiles: &TileCollection) -> Result<usize, ProviderError> {
        let mut written = 0;
        for tile in tiles {
            let Some(data) = &tile.data else {
                continue;
            };
            let path = self.tile_path(tile.coord);
            let io_err = |source| ProviderError::Io {
                path: path.clone(),
                source,
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            fs::write(&path, data).map_err(io_err)?;
            trace!(tile = %tile.coord, "Exported tile");
            written += 1;
        }
        Ok(written)
    }
}

impl TileImporter for DirectoryArchive {
    fn load_tile_coords(&self, coords: &[TileCoord]) -> Result<TileCollection, ProviderError> {
        let mut tiles = TileCollection::new();
        for &coord in coords {
            let path = self.tile_path(coord);
            match fs::read(&path) {
                Ok(data) => tiles.push(Tile::new(coord, Bytes::from(data))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => tiles.push(Tile::empty(coord)),
                Err(source) => return Err(ProviderError::Io { path, source }),
            }
        }
        Ok(tiles)
    }
}
