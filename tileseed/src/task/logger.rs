//! Throttled progress reporting.
//!
//! The walker reports far more often than anyone wants to read. The
//! [`TracingProgressLogger`] drops reports that arrive faster than its
//! configured intervals and persists the walk checkpoint whenever it emits a
//! progress line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::progress::TaskProgress;
use super::store::ProgressStore;
use crate::grid::BBox;

/// Default minimum time between progress lines in verbose mode.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum time between progress lines when not verbose.
pub const QUIET_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Default minimum time between step lines.
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(500);

/// Receives progress from walkers and worker queues.
pub trait ProgressLogger: Send + Sync {
    /// Logs a free-form message.
    fn log_message(&self, message: &str);

    /// Called for every dispatched work unit.
    fn log_step(&self, progress: &TaskProgress);

    /// Called when the walker enters a reported level and when a walk ends.
    fn log_progress(&self, progress: &TaskProgress, level: u8, bbox: &BBox, tiles: usize);

    /// Sets the task whose checkpoints are persisted.
    fn set_current_task_id(&self, task_id: Option<&str>);
}

/// Logger configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLoggerConfig {
    /// Minimum time between progress lines in verbose mode.
    pub log_interval: Duration,
    /// Minimum time between step lines.
    pub step_interval: Duration,
    /// Emit step lines and use `log_interval` for progress lines.
    pub verbose: bool,
}

impl Default for ProgressLoggerConfig {
    fn default() -> Self {
        Self {
            log_interval: DEFAULT_LOG_INTERVAL,
            step_interval: DEFAULT_STEP_INTERVAL,
            verbose: true,
        }
    }
}

#[derive(Debug, Default)]
struct LogState {
    last_step: Option<Instant>,
    last_progress: Option<Instant>,
    task_id: Option<String>,
}

/// [`ProgressLogger`] writing through `tracing`.
pub struct TracingProgressLogger {
    config: ProgressLoggerConfig,
    store: Option<Arc<dyn ProgressStore>>,
    state: Mutex<LogState>,
}

impl TracingProgressLogger {
    pub fn new(config: ProgressLoggerConfig) -> Self {
        Self {
            config,
            store: None,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Persists checkpoints to `store` on every emitted progress line.
    pub fn with_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn progress_interval(&self) -> Duration {
        if self.config.verbose {
            self.config.log_interval
        } else {
            QUIET_LOG_INTERVAL
        }
    }

    fn persist(&self, task_id: Option<&str>, progress: &TaskProgress) {
        let (Some(store), Some(task_id)) = (&self.store, task_id) else {
            return;
        };
        store.add(task_id, progress.current_progress_identifier());
        if let Err(e) = store.write() {
            warn!(task_id, error = %e, "Unable to write progress checkpoint");
        }
    }
}

impl Default for TracingProgressLogger {
    fn default() -> Self {
        Self::new(ProgressLoggerConfig::default())
    }
}

impl ProgressLogger for TracingProgressLogger {
    fn log_message(&self, message: &str) {
        info!("{}", message);
    }

    fn log_step(&self, progress: &TaskProgress) {
        if !self.config.verbose {
            return;
        }
        let mut state = self.state.lock();
        let now = Instant::now();
        if state
            .last_step
            .is_some_and(|last| now.duration_since(last) < self.config.step_interval)
        {
            return;
        }
        state.last_step = Some(now);
        drop(state);

        debug!(
            percent = %format!("{:.2}", progress.progress() * 100.0),
            status = %progress.status_str(),
            eta = %progress.eta(),
            "Walk step"
        );
    }

    fn log_progress(&self, progress: &TaskProgress, level: u8, bbox: &BBox, tiles: usize) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let due = progress.progress() >= 1.0
            || state
                .last_progress
                .map_or(true, |last| now.duration_since(last) >= self.progress_interval());
        if !due {
            return;
        }
        state.last_progress = Some(now);
        let task_id = state.task_id.clone();
        drop(state);

        self.persist(task_id.as_deref(), progress);

        info!(
            level,
            percent = %format!("{:.2}", progress.progress() * 100.0),
            bbox = %bbox,
            tiles,
            eta = %progress.eta(),
            "Walk progress"
        );
    }

    fn set_current_task_id(&self, task_id: Option<&str>) {
        self.state.lock().task_id = task_id.map(str::to_string);
    }
}
