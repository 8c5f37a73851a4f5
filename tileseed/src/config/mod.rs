//! Batch configuration loaded from an INI file.
//!
//! Every key is optional; missing sections and keys keep their defaults.
//!
//! ```ini
//! [batch]
//! concurrency = 4
//! skip_geoms_for_last_levels = 2
//! dry_run = false
//!
//! [lock]
//! directory = ~/.cache/tileseed/locks
//! timeout = 60
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 100
//! max_delay_secs = 30
//!
//! [progress]
//! file = ~/.cache/tileseed/progress.json
//! log_interval_secs = 1
//! step_interval_ms = 500
//! verbose = true
//! ```

mod parser;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::task::{
    Backoff, BatchOptions, FileProgressStore, LocalCacheLocker, LockRegistry, ProgressLoggerConfig,
    RetryPolicy, DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS,
};

/// Default lock timeout in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

/// Default delay before the first retry in milliseconds.
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 100;

/// Default upper bound of retry delays in seconds.
pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 30;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// `[batch]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub skip_geoms_for_last_levels: usize,
    pub dry_run: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            skip_geoms_for_last_levels: 0,
            dry_run: false,
        }
    }
}

/// `[lock]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    pub directory: PathBuf,
    pub timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            directory: default_lock_directory(),
            timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            max_delay_secs: DEFAULT_RETRY_MAX_DELAY_SECS,
        }
    }
}

/// `[progress]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSettings {
    /// Checkpoint file; no checkpoints are kept when unset.
    pub file: Option<PathBuf>,
    pub log_interval_secs: u64,
    pub step_interval_ms: u64,
    pub verbose: bool,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        let logger = ProgressLoggerConfig::default();
        Self {
            file: None,
            log_interval_secs: logger.log_interval.as_secs(),
            step_interval_ms: logger.step_interval.as_millis() as u64,
            verbose: logger.verbose,
        }
    }
}

/// Complete batch configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub batch: BatchSettings,
    pub lock: LockSettings,
    pub retry: RetrySettings,
    pub progress: ProgressSettings,
}

impl ConfigFile {
    /// Loads configuration from `path`.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Parses configuration from INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(content).map_err(ini::Error::Parse)?;
        parser::parse_ini(&ini)
    }

    /// Retry policy with exponential backoff.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_backoff(
            self.retry.max_attempts,
            Backoff::Exponential {
                initial: Duration::from_millis(self.retry.initial_delay_ms),
                max: Duration::from_secs(self.retry.max_delay_secs),
                factor: 2.0,
            },
        )
    }

    /// Batch options without logger or progress store.
    pub fn batch_options(&self) -> BatchOptions {
        let mut options = BatchOptions::default()
            .with_concurrency(self.batch.concurrency)
            .with_dry_run(self.batch.dry_run)
            .with_retry(self.retry_policy());
        options.skip_geoms_for_last_levels = self.batch.skip_geoms_for_last_levels;
        options
    }

    /// Locker writing lock files to the configured directory.
    pub fn cache_locker(&self, registry: Arc<LockRegistry>) -> LocalCacheLocker {
        LocalCacheLocker::new(&self.lock.directory, registry)
            .with_timeout(Duration::from_secs(self.lock.timeout_secs))
    }

    pub fn logger_config(&self) -> ProgressLoggerConfig {
        ProgressLoggerConfig {
            log_interval: Duration::from_secs(self.progress.log_interval_secs),
            step_interval: Duration::from_millis(self.progress.step_interval_ms),
            verbose: self.progress.verbose,
        }
    }

    /// Progress store for the configured file, if any.
    pub fn progress_store(&self, resume: bool) -> Option<FileProgressStore> {
        self.progress
            .file
            .as_ref()
            .map(|path| FileProgressStore::open(path, resume))
    }
}

/// Default directory for lock files.
pub fn default_lock_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tileseed")
        .join("locks")
}
