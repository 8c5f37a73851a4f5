//! Bounded-concurrency worker pool.
//!
//! # Architecture
//!
//! ```text
//! walker thread             dispatcher (run)                workers (N)
//! ─────────────             ────────────────                ───────────
//! process(work) ──► deque ──► offer to channel ──────────►  recv work
//!                  + wake      track in-flight               spawn_blocking(run)
//!                              ◄──── completion ───────────  send outcome
//! ```
//!
//! The deque is unbounded so the walker never blocks on dispatch. At most
//! `size` units run at the same time. [`WorkerQueue::run`] returns once the
//! producer has called [`close`](WorkerQueue::close) and every queued unit
//! completed, or once in-flight units drained after [`stop`](WorkerPool::stop)
//! or cancellation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::error::{TaskError, WorkError};
use super::logger::ProgressLogger;
use super::progress::TaskProgress;
use super::work::Work;
use crate::grid::TileCoord;

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Accepts work from the walker.
pub trait WorkerPool: Send + Sync {
    /// Enqueues `work`. Returns false when the pool no longer accepts work
    /// and the walk should stop.
    fn process(&self, work: Box<dyn Work>, progress: Option<&TaskProgress>) -> bool;

    /// Stops dispatching queued work. Running units complete.
    fn stop(&self);
}

/// A work unit that returned an error.
#[derive(Debug)]
pub struct WorkFailure {
    pub tiles: Vec<TileCoord>,
    pub error: WorkError,
}

/// Outcome of one queue run.
#[derive(Debug, Default)]
pub struct WorkSummary {
    /// Units accepted by `process`.
    pub dispatched: usize,
    /// Units that ran successfully.
    pub completed: usize,
    /// Tiles handled by successful units.
    pub tiles: usize,
    /// Units that returned an error.
    pub failures: Vec<WorkFailure>,
    /// Units dropped from the queue after a stop.
    pub discarded: usize,
}

impl WorkSummary {
    /// Returns true if no unit failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, outcome: WorkOutcome) {
        match outcome.result {
            Ok(tiles) => {
                self.completed += 1;
                self.tiles += tiles;
            }
            Err(error) => {
                warn!(tiles = outcome.tiles.len(), error = %error, "Work unit failed");
                self.failures.push(WorkFailure {
                    tiles: outcome.tiles,
                    error,
                });
            }
        }
    }
}

struct WorkOutcome {
    tiles: Vec<TileCoord>,
    result: Result<usize, WorkError>,
}

/// Resets the running flag when `run` exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Worker pool backed by tokio tasks.
pub struct WorkerQueue {
    size: usize,
    dry_run: bool,
    requests: Mutex<VecDeque<Box<dyn Work>>>,
    wake: Notify,
    running: AtomicBool,
    closed: AtomicBool,
    stopped: AtomicBool,
    dispatched: AtomicUsize,
    cancel: CancellationToken,
    logger: Option<Arc<dyn ProgressLogger>>,
}

impl WorkerQueue {
    /// Creates a queue running at most `size` units concurrently.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            dry_run: false,
            requests: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            dispatched: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            logger: None,
        }
    }

    /// Counts and logs work without executing it.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Stops the queue when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Reports each accepted unit as a step.
    pub fn with_logger(mut self, logger: Option<Arc<dyn ProgressLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Number of concurrent workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true while `run` is executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of queued units not yet handed to a worker.
    pub fn pending(&self) -> usize {
        self.requests.lock().len()
    }

    /// Signals that no more work will be added.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Dispatches queued work until the queue is closed and drained.
    ///
    /// # Panics
    ///
    /// Panics if called while another `run` on the same queue is active.
    pub async fn run(&self) -> Result<WorkSummary, TaskError> {
        if self.running.swap(true, Ordering::SeqCst) {
            panic!("WorkerQueue::run called while the queue is already running");
        }
        let _running = RunningGuard(&self.running);

        let (request_tx, request_rx) = mpsc::channel::<Box<dyn Work>>(self.size);
        let request_rx = Arc::new(tokio::sync::Mutex::new(request_rx));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<WorkOutcome>();

        let workers: Vec<_> = (0..self.size)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&request_rx),
                    done_tx.clone(),
                ))
            })
            .collect();
        drop(done_tx);

        debug!(workers = self.size, "Worker queue started");

        let mut summary = WorkSummary::default();
        let mut in_flight = 0usize;
        let mut offer: Option<Box<dyn Work>> = None;

        loop {
            let stopped = self.is_stopped();
            if stopped {
                if let Some(work) = offer.take() {
                    drop(work);
                    summary.discarded += 1;
                }
                let mut requests = self.requests.lock();
                summary.discarded += requests.len();
                requests.clear();
                drop(requests);
                if in_flight == 0 {
                    break;
                }
            } else {
                if offer.is_none() {
                    offer = self.requests.lock().pop_front();
                }
                if offer.is_none() && in_flight == 0 && self.closed.load(Ordering::SeqCst) {
                    // re-check: work may have arrived between pop and close
                    if self.requests.lock().is_empty() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                biased;

                Some(outcome) = done_rx.recv(), if in_flight > 0 => {
                    in_flight -= 1;
                    summary.record(outcome);
                }

                permit = request_tx.reserve(), if offer.is_some() && !stopped => {
                    let permit = permit
                        .map_err(|_| TaskError::WorkerPool("all workers exited".to_string()))?;
                    if let Some(work) = offer.take() {
                        permit.send(work);
                        in_flight += 1;
                    }
                }

                _ = self.cancel.cancelled(), if !stopped => {
                    debug!("Worker queue cancelled");
                }

                _ = self.wake.notified() => {}
            }
        }

        drop(request_tx);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }

        summary.dispatched = self.dispatched.load(Ordering::SeqCst);
        debug!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            failed = summary.failures.len(),
            discarded = summary.discarded,
            "Worker queue finished"
        );
        Ok(summary)
    }
}

impl WorkerPool for WorkerQueue {
    fn process(&self, work: Box<dyn Work>, progress: Option<&TaskProgress>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        if !self.dry_run {
            self.requests.lock().push_back(work);
            self.wake.notify_one();
        }

        if let (Some(logger), Some(progress)) = (&self.logger, progress) {
            logger.log_step(progress);
        }
        true
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

async fn worker_loop(
    id: usize,
    requests: Arc<tokio::sync::Mutex<mpsc::Receiver<Box<dyn Work>>>>,
    done: mpsc::UnboundedSender<WorkOutcome>,
) {
    loop {
        let work = {
            let mut rx = requests.lock().await;
            rx.recv().await
        };
        let Some(work) = work else {
            break;
        };

        let tiles = work.tiles().to_vec();
        trace!(worker = id, tiles = tiles.len(), "Running work unit");
        let result = match tokio::task::spawn_blocking(move || work.run()).await {
            Ok(result) => result,
            Err(e) => Err(WorkError::Panicked(e.to_string())),
        };

        if done.send(WorkOutcome { tiles, result }).is_err() {
            break;
        }
    }
}
