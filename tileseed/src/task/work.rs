//! Work units executed by the worker pool.
//!
//! Every dispatch from the walker produces one [`Work`] value holding the
//! tiles of one meta-tile (or a single tile). Workers run it exactly once on
//! a blocking thread.

use std::fmt;
use std::sync::Arc;

use super::error::WorkError;
use crate::grid::TileCoord;
use crate::manager::TileManager;
use crate::provider::{TileExporter, TileImporter};

/// One unit of work for the pool.
pub trait Work: Send {
    /// Tiles handled by this unit.
    fn tiles(&self) -> &[TileCoord];

    /// Executes the unit. Returns the number of tiles actually handled.
    fn run(&self) -> Result<usize, WorkError>;
}

/// Loads tiles through the manager, fetching missing ones from the source.
pub struct SeedWorker {
    manager: Arc<dyn TileManager>,
    tiles: Vec<TileCoord>,
}

impl SeedWorker {
    pub fn new(manager: Arc<dyn TileManager>, tiles: Vec<TileCoord>) -> Self {
        Self { manager, tiles }
    }
}

impl Work for SeedWorker {
    fn tiles(&self) -> &[TileCoord] {
        &self.tiles
    }

    fn run(&self) -> Result<usize, WorkError> {
        Ok(self.manager.load_tile_coords(&self.tiles)?.loaded())
    }
}

/// Removes tiles from the cache.
pub struct CleanupWorker {
    manager: Arc<dyn TileManager>,
    tiles: Vec<TileCoord>,
}

impl CleanupWorker {
    pub fn new(manager: Arc<dyn TileManager>, tiles: Vec<TileCoord>) -> Self {
        Self { manager, tiles }
    }
}

impl Work for CleanupWorker {
    fn tiles(&self) -> &[TileCoord] {
        &self.tiles
    }

    fn run(&self) -> Result<usize, WorkError> {
        Ok(self.manager.remove_tile_coords(&self.tiles)?)
    }
}

/// Loads tiles from the cache and writes them to an exporter.
pub struct ExportWorker {
    manager: Arc<dyn TileManager>,
    exporter: Arc<dyn TileExporter>,
    tiles: Vec<TileCoord>,
}

impl ExportWorker {
    pub fn new(
        manager: Arc<dyn TileManager>,
        exporter: Arc<dyn TileExporter>,
        tiles: Vec<TileCoord>,
    ) -> Self {
        Self {
            manager,
            exporter,
            tiles,
        }
    }
}

impl Work for ExportWorker {
    fn tiles(&self) -> &[TileCoord] {
        &self.tiles
    }

    fn run(&self) -> Result<usize, WorkError> {
        let collection = self.manager.load_tile_coords(&self.tiles)?;
        Ok(self.exporter.store_tile_collection(&collection)?)
    }
}

/// Reads tiles from an importer and stores them into the cache.
pub struct ImportWorker {
    manager: Arc<dyn TileManager>,
    importer: Arc<dyn TileImporter>,
    tiles: Vec<TileCoord>,
}

impl ImportWorker {
    pub fn new(
        manager: Arc<dyn TileManager>,
        importer: Arc<dyn TileImporter>,
        tiles: Vec<TileCoord>,
    ) -> Self {
        Self {
            manager,
            importer,
            tiles,
        }
    }
}

impl Work for ImportWorker {
    fn tiles(&self) -> &[TileCoord] {
        &self.tiles
    }

    fn run(&self) -> Result<usize, WorkError> {
        let collection = self.importer.load_tile_coords(&self.tiles)?;
        if collection.loaded() == 0 {
            return Ok(0);
        }
        Ok(self.manager.store_tiles(&collection)?)
    }
}

macro_rules! impl_work_debug {
    ($($worker:ident),*) => {
        $(
            impl fmt::Debug for $worker {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($worker))
                        .field("cache", &self.manager.cache_name())
                        .field("tiles", &self.tiles.len())
                        .finish()
                }
            }
        )*
    };
}

impl_work_debug!(SeedWorker, CleanupWorker, ExportWorker, ImportWorker);
