//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, interrupt handling and
//! the async runtime to reduce duplication across command handlers.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tileseed::config::ConfigFile;
use tileseed::logging::{init_logging, LoggingGuard};
use tileseed::task::{
    BatchOptions, BatchReport, FileProgressStore, JobOutcome, LocalCacheLocker, LockRegistry,
    ProgressStore, TracingProgressLogger,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::common::CommonArgs;
use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
    cancel: CancellationToken,
}

impl CliRunner {
    /// Create a new CLI runner, loading config and initializing logging.
    ///
    /// Installs a Ctrl-C handler that cancels the batch. Running work units
    /// complete, queued ones are dropped.
    pub fn new(common: &CommonArgs) -> Result<Self, CliError> {
        let config_path = common.config.clone().unwrap_or_else(default_config_path);
        let config = ConfigFile::load_from(&config_path)?;

        let logging_guard = init_logging(common.log_dir.as_deref())
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, waiting for running work to finish...");
            token.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

        Ok(Self {
            logging_guard,
            config,
            cancel,
        })
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("TileSeed v{}", tileseed::VERSION);
        info!("TileSeed CLI: {} command", command);
    }

    /// Batch options from the config file, overridden by CLI flags.
    pub fn batch_options(&self, common: &CommonArgs) -> BatchOptions {
        let mut options = self
            .config
            .batch_options()
            .with_cancellation(self.cancel.clone());
        if let Some(concurrency) = common.concurrency {
            options = options.with_concurrency(concurrency);
        }
        if common.dry_run {
            options = options.with_dry_run(true);
        }

        let store = match &common.progress_file {
            Some(path) => Some(FileProgressStore::open(path, common.resume)),
            None => self.config.progress_store(common.resume),
        };
        let mut logger = TracingProgressLogger::new(self.config.logger_config());
        match store {
            Some(store) => {
                info!(path = %store.path().display(), resume = common.resume, "Using progress file");
                let store: Arc<dyn ProgressStore> = Arc::new(store);
                logger = logger.with_store(Arc::clone(&store));
                options = options.with_progress_store(store);
            }
            None if common.resume => {
                warn!("--resume given without a progress file, starting from scratch");
            }
            None => {}
        }
        options.with_logger(Arc::new(logger))
    }

    /// Locker for the configured lock directory.
    pub fn locker(&self) -> LocalCacheLocker {
        self.config.cache_locker(Arc::new(LockRegistry::new()))
    }

    /// Runs `future` on a fresh multi-threaded runtime.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, CliError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)?;
        Ok(runtime.block_on(future))
    }

    /// Prints the batch report and maps it to the exit status.
    pub fn finish(&self, report: &BatchReport) -> Result<(), CliError> {
        for job in &report.jobs {
            let summary = job
                .summary
                .as_ref()
                .map(|s| format!("{} work units, {} tiles", s.dispatched, s.tiles))
                .unwrap_or_default();
            match &job.outcome {
                JobOutcome::Completed => println!("{} ({}): done, {}", job.id, job.kind, summary),
                JobOutcome::Skipped => println!("{} ({}): skipped, coverage outside grid", job.id, job.kind),
                JobOutcome::Failed(e) => println!(
                    "{} ({}): failed after {} attempts: {}",
                    job.id, job.kind, job.attempts, e
                ),
                JobOutcome::Cancelled => println!("{} ({}): cancelled", job.id, job.kind),
            }
        }

        if report.was_cancelled() {
            return Err(CliError::Cancelled);
        }
        let failed = report.failed().count();
        if failed > 0 {
            return Err(CliError::BatchFailed {
                failed,
                total: report.jobs.len(),
            });
        }
        Ok(())
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tileseed")
        .join("tileseed.ini")
}
