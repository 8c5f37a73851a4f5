//! Batch scheduling of tile cache maintenance jobs.
//!
//! A batch is a list of [`Task`]s. Each task walks the tile pyramid of one
//! cache, restricted to a coverage and a set of levels, and hands batches of
//! tiles to a bounded [`WorkerQueue`]. What happens to the tiles depends on
//! the task kind:
//!
//! - [`SeedTask`] - loads missing or outdated tiles from the cache's source
//! - [`CleanupTask`] - removes tiles older than a timestamp
//! - [`ExportTask`] - copies cached tiles to a [`TileExporter`](crate::provider::TileExporter)
//! - [`ImportTask`] - copies tiles from a [`TileImporter`](crate::provider::TileImporter)
//!
//! # Architecture
//!
//! ```text
//! seed()/cleanup()/export()/import()
//!        │
//!        ▼
//!   run_batch ── CacheLocker ── run_job
//!                                 ├── TileWalker ── TileIterator
//!                                 │       │            (coverage pruning)
//!                                 │       └── TaskProgress ── ProgressLogger ── ProgressStore
//!                                 └── WorkerQueue ── Work (Seed/Cleanup/Export/Import)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tileseed::task::{self, BatchOptions, DummyCacheLocker, SeedTask, TaskSpec};
//! use tileseed::coverage::TaskCoverage;
//!
//! let task = SeedTask::new(TaskSpec::new("osm", manager, vec![0, 1, 2], TaskCoverage::Full));
//! let report = task::seed(vec![task], &BatchOptions::default(), &DummyCacheLocker).await;
//! assert!(report.is_success());
//! ```

mod error;
mod iterator;
mod locker;
mod logger;
mod progress;
mod queue;
mod retry;
mod runner;
mod store;
mod types;
mod walker;
mod work;

// Errors
pub use error::{LockError, StoreError, TaskError, WorkError};

// Tasks and work units
pub use types::{CleanupTask, ExportTask, ImportTask, SeedTask, Task, TaskKind, TaskSpec, TileFilter};
pub use work::{CleanupWorker, ExportWorker, ImportWorker, SeedWorker, Work};

// Walking
pub use iterator::{Candidate, TileIterator};
pub use progress::{can_skip, status_symbol, Eta, ProgressStep, TaskProgress};
pub use walker::{TileWalker, SEEN_TILES_PER_LEVEL};

// Execution
pub use locker::{
    BoxFuture, CacheLocker, DummyCacheLocker, LocalCacheLocker, LockMode, LockRegistry,
    LockedResult, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
pub use queue::{WorkFailure, WorkSummary, WorkerPool, WorkerQueue, DEFAULT_CONCURRENCY};
pub use retry::{Backoff, RetryPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use runner::{
    cleanup, export, import, run_batch, seed, BatchOptions, BatchReport, JobOutcome, JobReport,
};

// Progress reporting
pub use logger::{
    ProgressLogger, ProgressLoggerConfig, TracingProgressLogger, DEFAULT_LOG_INTERVAL,
    DEFAULT_STEP_INTERVAL, QUIET_LOG_INTERVAL,
};
pub use store::{FileProgressStore, ProgressStore};
