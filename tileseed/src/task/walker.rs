//! Recursive, coverage-pruned traversal of the tile pyramid.
//!
//! # Algorithm
//!
//! The walker descends from level 0 to the deepest requested level. At every
//! level it asks the meta grid for the meta-tiles touching the parent's
//! extent and classifies each one against the task coverage:
//!
//! ```text
//! level 0          [A]                    A: Contains  → children skip geometry tests
//!                 /   \
//! level 1      [B]     [C]                C: None      → whole subtree skipped
//!             / | \
//! level 2   ... ... ...
//! ```
//!
//! A single pass serves all requested levels: children are walked first,
//! then the meta-tile itself is dispatched if its level was requested. Each
//! step down is recorded in [`TaskProgress`] so an interrupted walk can
//! resume from its last checkpoint.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::Arc;

use tracing::trace;

use super::error::TaskError;
use super::iterator::TileIterator;
use super::logger::ProgressLogger;
use super::progress::TaskProgress;
use super::queue::WorkerPool;
use super::types::{Task, TileFilter};
use crate::coverage::Intersection;
use crate::grid::{BBox, MetaGrid, TileCoord};

/// Number of dispatched meta-tiles remembered per level.
pub const SEEN_TILES_PER_LEVEL: usize = 64;

/// Walks the tiles of one task and hands them to a worker pool.
pub struct TileWalker {
    task: Arc<dyn Task>,
    pool: Arc<dyn WorkerPool>,
    meta_grid: MetaGrid,
    work_on_metatiles: bool,
    filter: TileFilter,
    skip_geoms_for_last_levels: usize,
    report_till_level: u8,
    tiles_per_metatile: usize,
    // Neighbouring meta-tiles near coverage edges can reach the same tile
    // through different parents.
    seen: HashMap<u8, VecDeque<TileCoord>>,
    count: usize,
    logger: Option<Arc<dyn ProgressLogger>>,
    progress: TaskProgress,
}

impl TileWalker {
    /// Creates a walker using the task's own dispatch settings.
    pub fn new(task: Arc<dyn Task>, pool: Arc<dyn WorkerPool>) -> Self {
        let manager = Arc::clone(task.manager());
        let meta_grid = manager
            .meta_grid()
            .cloned()
            .unwrap_or_else(|| MetaGrid::new(manager.grid().clone(), (1, 1)));
        let (meta_w, meta_h) = meta_grid.configured_meta_size();

        let levels = task.levels();
        let report_till_level = if levels.len() >= 4 {
            levels[levels.len() - 2]
        } else {
            levels.last().copied().unwrap_or(0)
        };
        let seen = levels
            .iter()
            .map(|&level| (level, VecDeque::with_capacity(SEEN_TILES_PER_LEVEL)))
            .collect();

        Self {
            work_on_metatiles: task.work_on_metatiles(),
            filter: task.tile_filter(),
            task,
            pool,
            meta_grid,
            skip_geoms_for_last_levels: 0,
            report_till_level,
            tiles_per_metatile: (meta_w * meta_h) as usize,
            seen,
            count: 0,
            logger: None,
            progress: TaskProgress::default(),
        }
    }

    pub fn with_work_on_metatiles(mut self, enabled: bool) -> Self {
        self.work_on_metatiles = enabled;
        self
    }

    pub fn with_filter(mut self, filter: TileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Treats candidates as fully covered once fewer than `levels` requested
    /// levels remain.
    pub fn with_skip_geoms_for_last_levels(mut self, levels: usize) -> Self {
        self.skip_geoms_for_last_levels = levels;
        self
    }

    pub fn with_logger(mut self, logger: Option<Arc<dyn ProgressLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Walks with `progress`, e.g. one resuming from a checkpoint.
    pub fn with_progress(mut self, progress: TaskProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &TaskProgress {
        &self.progress
    }

    pub fn into_progress(self) -> TaskProgress {
        self.progress
    }

    /// Number of dispatched work units.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Last level that is reported when entered.
    pub fn report_till_level(&self) -> u8 {
        self.report_till_level
    }

    /// Walks the task.
    ///
    /// Returns `Ok(false)` if the walk was cancelled or the pool stopped
    /// accepting work.
    pub fn walk(&mut self) -> Result<bool, TaskError> {
        let levels = self.task.levels().to_vec();
        let Some(&first_level) = levels.first() else {
            return Ok(true);
        };
        let grid = self.meta_grid.grid();
        let extent = grid.extent();
        let Some(bbox) = self.task.coverage().extent_for(grid.srs(), extent) else {
            return Ok(true);
        };
        // candidates outside the grid are never processed
        let bbox = bbox.limit_to(&extent);
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Ok(true);
        }

        let mut progress = mem::take(&mut self.progress);
        let result = if progress.already_processed() {
            progress.step_forward(1);
            Ok(true)
        } else {
            self.walk_level(&mut progress, bbox, &levels, 0, false)
        };
        self.report(&progress, first_level, &bbox);
        self.progress = progress;
        result
    }

    fn walk_level(
        &mut self,
        progress: &mut TaskProgress,
        bbox: BBox,
        levels: &[u8],
        level: u8,
        all_subtiles: bool,
    ) -> Result<bool, TaskError> {
        let affected = self.meta_grid.get_affected_level_tiles(&bbox, level)?;
        let total = affected.total();
        let all_subtiles = all_subtiles || levels.len() < self.skip_geoms_for_last_levels;
        let candidates: Vec<_> = TileIterator::new(
            self.task.as_ref(),
            &self.meta_grid,
            affected.coords,
            all_subtiles,
        )
        .collect();

        let requested = levels.first() == Some(&level);
        if requested && level <= self.report_till_level {
            self.report(progress, level, &bbox);
        }

        if progress.is_cancelled() {
            self.report(progress, level, &bbox);
            self.task.manager().cleanup();
            return Ok(false);
        }

        let levels = if requested { &levels[1..] } else { levels };

        for (index, candidate) in candidates.into_iter().enumerate() {
            let Some(candidate) = candidate else {
                progress.step_forward(total);
                continue;
            };

            if !levels.is_empty() {
                let sub_bbox = candidate.bbox.limit_to(&bbox);
                let contained = candidate.intersection == Intersection::Contains;
                let completed = progress.step_down(index, total, |p| {
                    if p.already_processed() {
                        p.step_forward(1);
                        Ok(true)
                    } else {
                        self.walk_level(p, sub_bbox, levels, level + 1, contained)
                    }
                })?;
                if !completed {
                    return Ok(false);
                }
            }

            if !requested {
                continue;
            }

            if !self.mark_seen(level, candidate.coord) {
                if levels.is_empty() {
                    progress.step_forward(total);
                }
                continue;
            }

            let tiles = self.select_tiles(candidate.coord)?;
            if !tiles.is_empty() {
                self.count += 1;
                trace!(level, tiles = tiles.len(), coord = %candidate.coord, "Dispatching tiles");
                if !self.pool.process(self.task.new_work(tiles), Some(&*progress)) {
                    return Ok(false);
                }
            }

            if levels.is_empty() {
                progress.step_forward(total);
            }
        }

        if levels.len() >= 4 {
            self.task.manager().cleanup();
        }
        Ok(true)
    }

    /// Remembers `coord`. Returns false if it was dispatched recently.
    fn mark_seen(&mut self, level: u8, coord: TileCoord) -> bool {
        let seen = self.seen.entry(level).or_default();
        if seen.contains(&coord) {
            return false;
        }
        seen.push_front(coord);
        seen.truncate(SEEN_TILES_PER_LEVEL);
        true
    }

    fn select_tiles(&self, coord: TileCoord) -> Result<Vec<TileCoord>, TaskError> {
        let tiles = if self.work_on_metatiles {
            vec![coord]
        } else {
            self.meta_grid.tile_list(coord)?
        };
        let manager = self.task.manager();
        Ok(match self.filter {
            TileFilter::All => tiles,
            TileFilter::Uncached => tiles.into_iter().filter(|&t| !manager.is_cached(t)).collect(),
            TileFilter::Stale => tiles.into_iter().filter(|&t| manager.is_stale(t)).collect(),
        })
    }

    fn report(&self, progress: &TaskProgress, level: u8, bbox: &BBox) {
        if let Some(logger) = &self.logger {
            logger.log_progress(progress, level, bbox, self.count * self.tiles_per_metatile);
        }
    }
}
