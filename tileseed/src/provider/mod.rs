//! External tile sinks and sources for export and import jobs.
//!
//! An export job loads tiles through the cache manager and hands them to a
//! [`TileExporter`]; an import job reads tiles from a [`TileImporter`] and
//! stores them into the cache.

mod directory;

pub use directory::DirectoryArchive;

use std::path::PathBuf;

use thiserror::Error;

use crate::grid::TileCoord;
use crate::manager::TileCollection;

/// Errors raised by export/import providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Reading or writing the archive failed.
    #[error("archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for exported tiles.
pub trait TileExporter: Send + Sync {
    /// Writes every tile carrying data. Returns the number of written tiles.
    fn store_tile_collection(&self, tiles: &TileCollection) -> Result<usize, ProviderError>;
}

/// Source of tiles to import.
pub trait TileImporter: Send + Sync {
    /// Loads the given tiles. Tiles missing from the source are returned
    /// without data.
    fn load_tile_coords(&self, coords: &[TileCoord]) -> Result<TileCollection, ProviderError>;
}
