//! Error types for batch jobs.

use std::path::PathBuf;

use thiserror::Error;

use crate::grid::GridError;
use crate::manager::ManagerError;
use crate::provider::ProviderError;

/// Failure of a single work unit.
#[derive(Debug, Error)]
pub enum WorkError {
    /// The cache manager failed to load, store or remove tiles.
    #[error("cache error: {0}")]
    Manager(#[from] ManagerError),

    /// The export sink or import source failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The worker thread panicked while running the unit.
    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Failure to acquire a cache lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another job holds the lock.
    #[error("cache {name} is locked by another job")]
    Busy { name: String },

    /// The lock file could not be created or locked.
    #[error("lock file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to persist job progress.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing or removing the progress file failed.
    #[error("progress file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The progress map could not be encoded.
    #[error("failed to encode progress: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of one job attempt.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The cache lock could not be acquired.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The job was cancelled before it completed.
    #[error("job cancelled")]
    Cancelled,

    /// Some work units failed.
    #[error("{failed} of {total} work units failed")]
    WorkFailures { failed: usize, total: usize },

    /// The worker pool shut down unexpectedly.
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// Tile grid lookups failed while walking.
    #[error("grid error: {0}")]
    Grid(#[from] GridError),

    /// A cache-wide operation failed.
    #[error("cache error: {0}")]
    Manager(#[from] ManagerError),
}

impl TaskError {
    /// Returns true if the error is lock contention.
    pub fn is_lock_busy(&self) -> bool {
        matches!(self, TaskError::Lock(LockError::Busy { .. }))
    }
}
