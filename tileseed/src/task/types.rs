//! Batch task definitions.
//!
//! A task describes one job: which cache, which levels, which area. The four
//! kinds share the walk and only differ in what they do with each batch of
//! tiles and in how they prepare the cache manager.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::info;

use super::error::TaskError;
use super::logger::ProgressLogger;
use super::queue::WorkSummary;
use super::work::{CleanupWorker, ExportWorker, ImportWorker, SeedWorker, Work};
use crate::coverage::{Intersection, TaskCoverage};
use crate::grid::{BBox, TileCoord};
use crate::manager::TileManager;
use crate::provider::{TileExporter, TileImporter};

/// The four batch job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Seed,
    Cleanup,
    Export,
    Import,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Seed => "seed",
            TaskKind::Cleanup => "cleanup",
            TaskKind::Export => "export",
            TaskKind::Import => "import",
        };
        f.write_str(name)
    }
}

/// Which tiles of a meta-tile are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFilter {
    /// Every tile.
    All,
    /// Tiles that are missing or stale.
    Uncached,
    /// Tiles that are cached but stale.
    Stale,
}

/// Fields shared by all task kinds.
#[derive(Clone)]
pub struct TaskSpec {
    pub id: String,
    pub metadata: BTreeMap<String, String>,
    pub manager: Arc<dyn TileManager>,
    /// Requested levels, ascending and without duplicates.
    pub levels: Vec<u8>,
    pub coverage: TaskCoverage,
}

impl TaskSpec {
    /// Creates a task description. `levels` are sorted and deduplicated.
    pub fn new(
        id: impl Into<String>,
        manager: Arc<dyn TileManager>,
        mut levels: Vec<u8>,
        coverage: TaskCoverage,
    ) -> Self {
        levels.sort_unstable();
        levels.dedup();
        Self {
            id: id.into(),
            metadata: BTreeMap::new(),
            manager,
            levels,
            coverage,
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("cache", &self.manager.cache_name())
            .field("levels", &self.levels)
            .field("coverage", &self.coverage)
            .finish()
    }
}

/// A batch job.
pub trait Task: Send + Sync {
    /// Shared task fields.
    fn spec(&self) -> &TaskSpec;

    fn kind(&self) -> TaskKind;

    /// Creates the work unit for a batch of tiles.
    fn new_work(&self, tiles: Vec<TileCoord>) -> Box<dyn Work>;

    /// Tiles the walker dispatches.
    fn tile_filter(&self) -> TileFilter;

    /// Dispatch whole meta-tiles instead of their individual tiles.
    fn work_on_metatiles(&self) -> bool;

    /// Configures the manager before the walk starts.
    fn prepare(&self) {}

    /// Runs the job without walking, if the kind supports it.
    ///
    /// Returns `None` when the job has to be walked.
    fn fast_path(
        &self,
        _dry_run: bool,
        _logger: Option<&dyn ProgressLogger>,
    ) -> Option<Result<WorkSummary, TaskError>> {
        None
    }

    fn id(&self) -> &str {
        &self.spec().id
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.spec().metadata
    }

    fn manager(&self) -> &Arc<dyn TileManager> {
        &self.spec().manager
    }

    fn levels(&self) -> &[u8] {
        &self.spec().levels
    }

    fn coverage(&self) -> &TaskCoverage {
        &self.spec().coverage
    }

    /// Name of the lock serializing jobs on the same cache.
    fn lock_name(&self) -> &str {
        self.manager().cache_name()
    }

    /// Classifies `bbox`, given in the manager's grid SRS, against the coverage.
    fn intersects(&self, bbox: &BBox) -> Intersection {
        self.coverage().intersects(bbox, self.manager().grid().srs())
    }
}

/// Fills a cache with missing or outdated tiles.
#[derive(Debug, Clone)]
pub struct SeedTask {
    spec: TaskSpec,
    refresh_before: Option<SystemTime>,
}

impl SeedTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            refresh_before: None,
        }
    }

    /// Re-seeds tiles written before `timestamp`.
    pub fn with_refresh_before(mut self, timestamp: SystemTime) -> Self {
        self.refresh_before = Some(timestamp);
        self
    }

    pub fn refresh_before(&self) -> Option<SystemTime> {
        self.refresh_before
    }
}

impl Task for SeedTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Seed
    }

    fn new_work(&self, tiles: Vec<TileCoord>) -> Box<dyn Work> {
        Box::new(SeedWorker::new(Arc::clone(&self.spec.manager), tiles))
    }

    fn tile_filter(&self) -> TileFilter {
        TileFilter::Uncached
    }

    fn work_on_metatiles(&self) -> bool {
        !self.spec.manager.rescale_tiles()
    }

    fn prepare(&self) {
        if let Some(timestamp) = self.refresh_before {
            self.spec.manager.set_expire_timestamp(Some(timestamp));
        }
        self.spec.manager.set_minimize_meta_requests(false);
    }
}

/// Removes tiles older than a timestamp.
#[derive(Debug, Clone)]
pub struct CleanupTask {
    spec: TaskSpec,
    remove_before: SystemTime,
    complete_extent: bool,
}

impl CleanupTask {
    pub fn new(spec: TaskSpec, remove_before: SystemTime) -> Self {
        Self {
            spec,
            remove_before,
            complete_extent: false,
        }
    }

    /// Marks the coverage as the full grid so whole levels may be removed
    /// without walking.
    pub fn with_complete_extent(mut self, complete: bool) -> Self {
        self.complete_extent = complete;
        self
    }

    pub fn remove_before(&self) -> SystemTime {
        self.remove_before
    }

    pub fn complete_extent(&self) -> bool {
        self.complete_extent
    }
}

impl Task for CleanupTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Cleanup
    }

    fn new_work(&self, tiles: Vec<TileCoord>) -> Box<dyn Work> {
        Box::new(CleanupWorker::new(Arc::clone(&self.spec.manager), tiles))
    }

    fn tile_filter(&self) -> TileFilter {
        TileFilter::Stale
    }

    fn work_on_metatiles(&self) -> bool {
        false
    }

    fn prepare(&self) {
        self.spec
            .manager
            .set_expire_timestamp(Some(self.remove_before));
        self.spec.manager.set_minimize_meta_requests(false);
    }

    fn fast_path(
        &self,
        dry_run: bool,
        logger: Option<&dyn ProgressLogger>,
    ) -> Option<Result<WorkSummary, TaskError>> {
        let manager = &self.spec.manager;
        if !self.complete_extent || !manager.supports_level_removal() {
            return None;
        }

        let mut summary = WorkSummary::default();
        for &level in &self.spec.levels {
            let message = format!("removing old tiles for level {}", level);
            match logger {
                Some(logger) => logger.log_message(&message),
                None => info!(task_id = %self.spec.id, level, "Removing old tiles"),
            }
            summary.dispatched += 1;
            if dry_run {
                continue;
            }
            match manager.remove_level_tiles_before(level, self.remove_before) {
                Ok(removed) => {
                    summary.completed += 1;
                    summary.tiles += removed;
                }
                Err(e) => return Some(Err(e.into())),
            }
            manager.cleanup();
        }
        Some(Ok(summary))
    }
}

/// Copies cached tiles to an external sink.
#[derive(Clone)]
pub struct ExportTask {
    spec: TaskSpec,
    exporter: Arc<dyn TileExporter>,
}

impl ExportTask {
    pub fn new(spec: TaskSpec, exporter: Arc<dyn TileExporter>) -> Self {
        Self { spec, exporter }
    }
}

impl Task for ExportTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Export
    }

    fn new_work(&self, tiles: Vec<TileCoord>) -> Box<dyn Work> {
        Box::new(ExportWorker::new(
            Arc::clone(&self.spec.manager),
            Arc::clone(&self.exporter),
            tiles,
        ))
    }

    fn tile_filter(&self) -> TileFilter {
        TileFilter::All
    }

    fn work_on_metatiles(&self) -> bool {
        false
    }
}

/// Copies tiles from an external source into the cache.
#[derive(Clone)]
pub struct ImportTask {
    spec: TaskSpec,
    importer: Arc<dyn TileImporter>,
    overwrite: bool,
}

impl ImportTask {
    pub fn new(spec: TaskSpec, importer: Arc<dyn TileImporter>) -> Self {
        Self {
            spec,
            importer,
            overwrite: false,
        }
    }

    /// Replaces tiles that are already cached.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }
}

impl Task for ImportTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Import
    }

    fn new_work(&self, tiles: Vec<TileCoord>) -> Box<dyn Work> {
        Box::new(ImportWorker::new(
            Arc::clone(&self.spec.manager),
            Arc::clone(&self.importer),
            tiles,
        ))
    }

    fn tile_filter(&self) -> TileFilter {
        if self.overwrite {
            TileFilter::All
        } else {
            TileFilter::Uncached
        }
    }

    fn work_on_metatiles(&self) -> bool {
        false
    }
}
