//! Batch sequencers for seed, cleanup, export and import jobs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   lock(cache)   ┌────────────────────────────────────────┐
//! │  run_batch   │ ──────────────► │ run_job                                │
//! │  FIFO jobs   │                 │  walker (blocking) ──► WorkerQueue     │
//! │  retry/busy  │ ◄────────────── │                        N workers       │
//! └──────────────┘   WorkSummary   └────────────────────────────────────────┘
//! ```
//!
//! Jobs run one after another. While other jobs are queued, locks are taken
//! without waiting and a busy cache just moves its job to the back of the
//! list. Failed attempts are retried according to the [`RetryPolicy`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::TaskError;
use super::locker::{CacheLocker, LockMode};
use super::logger::ProgressLogger;
use super::progress::TaskProgress;
use super::queue::{WorkSummary, WorkerPool, WorkerQueue, DEFAULT_CONCURRENCY};
use super::retry::RetryPolicy;
use super::store::ProgressStore;
use super::types::{CleanupTask, ExportTask, ImportTask, SeedTask, Task, TaskKind};
use super::walker::TileWalker;

/// Settings shared by all jobs of a batch.
#[derive(Clone)]
pub struct BatchOptions {
    /// Concurrent work units per job.
    pub concurrency: usize,
    /// Skip coverage tests for this many of the last levels.
    pub skip_geoms_for_last_levels: usize,
    /// Count and log work without running it.
    pub dry_run: bool,
    pub retry: RetryPolicy,
    pub logger: Option<Arc<dyn ProgressLogger>>,
    /// Checkpoints to resume from and to persist to.
    pub progress_store: Option<Arc<dyn ProgressStore>>,
    pub cancel: CancellationToken,
}

impl BatchOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn ProgressLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_progress_store(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.progress_store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            skip_geoms_for_last_levels: 0,
            dry_run: false,
            retry: RetryPolicy::default(),
            logger: None,
            progress_store: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("skip_geoms_for_last_levels", &self.skip_geoms_for_last_levels)
            .field("dry_run", &self.dry_run)
            .field("retry", &self.retry)
            .field("progress_store", &self.progress_store.is_some())
            .finish()
    }
}

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The coverage does not touch the grid.
    Skipped,
    /// All attempts failed; holds the last error.
    Failed(String),
    Cancelled,
}

/// Result of one job of a batch.
#[derive(Debug)]
pub struct JobReport {
    pub id: String,
    pub kind: TaskKind,
    pub outcome: JobOutcome,
    /// Attempts that ran or waited for the lock.
    pub attempts: u32,
    pub summary: Option<WorkSummary>,
}

/// Results of a batch, in job order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    /// Returns true if every job completed or was skipped.
    pub fn is_success(&self) -> bool {
        self.jobs
            .iter()
            .all(|job| matches!(job.outcome, JobOutcome::Completed | JobOutcome::Skipped))
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(|job| matches!(job.outcome, JobOutcome::Failed(_)))
    }

    pub fn was_cancelled(&self) -> bool {
        self.jobs
            .iter()
            .any(|job| job.outcome == JobOutcome::Cancelled)
    }

    pub fn get(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|job| job.id == id)
    }
}

/// Runs seed jobs.
pub async fn seed(
    tasks: Vec<SeedTask>,
    options: &BatchOptions,
    locker: &dyn CacheLocker,
) -> BatchReport {
    run_batch(into_dyn(tasks), options, locker).await
}

/// Runs cleanup jobs.
pub async fn cleanup(
    tasks: Vec<CleanupTask>,
    options: &BatchOptions,
    locker: &dyn CacheLocker,
) -> BatchReport {
    run_batch(into_dyn(tasks), options, locker).await
}

/// Runs export jobs.
pub async fn export(
    tasks: Vec<ExportTask>,
    options: &BatchOptions,
    locker: &dyn CacheLocker,
) -> BatchReport {
    run_batch(into_dyn(tasks), options, locker).await
}

/// Runs import jobs.
pub async fn import(
    tasks: Vec<ImportTask>,
    options: &BatchOptions,
    locker: &dyn CacheLocker,
) -> BatchReport {
    run_batch(into_dyn(tasks), options, locker).await
}

fn into_dyn<T: Task + 'static>(tasks: Vec<T>) -> Vec<Arc<dyn Task>> {
    tasks
        .into_iter()
        .map(|task| Arc::new(task) as Arc<dyn Task>)
        .collect()
}

struct PendingJob {
    index: usize,
    task: Arc<dyn Task>,
    attempts: u32,
    failed_before: bool,
}

impl PendingJob {
    fn report(self, outcome: JobOutcome, summary: Option<WorkSummary>) -> (usize, JobReport) {
        (
            self.index,
            JobReport {
                id: self.task.id().to_string(),
                kind: self.task.kind(),
                outcome,
                attempts: self.attempts,
                summary,
            },
        )
    }
}

/// Runs `tasks` in FIFO order, each under the lock of its cache.
pub async fn run_batch(
    tasks: Vec<Arc<dyn Task>>,
    options: &BatchOptions,
    locker: &dyn CacheLocker,
) -> BatchReport {
    let mut queue: VecDeque<PendingJob> = tasks
        .into_iter()
        .enumerate()
        .map(|(index, task)| PendingJob {
            index,
            task,
            attempts: 0,
            failed_before: false,
        })
        .collect();
    info!(jobs = queue.len(), dry_run = options.dry_run, "Starting batch");

    let mut reports = Vec::with_capacity(queue.len());
    let mut busy_streak = 0usize;

    while let Some(mut job) = queue.pop_front() {
        if options.cancel.is_cancelled() {
            reports.push(job.report(JobOutcome::Cancelled, None));
            reports.extend(queue.drain(..).map(|j| j.report(JobOutcome::Cancelled, None)));
            break;
        }

        if job.task.coverage().is_empty() {
            warn!(job_id = %job.task.id(), "Coverage does not intersect the grid, skipping job");
            reports.push(job.report(JobOutcome::Skipped, None));
            continue;
        }

        // wait only when every remaining job found its cache busy
        let mode = if queue.is_empty() || busy_streak > queue.len() {
            LockMode::Wait
        } else {
            LockMode::NoWait
        };

        let body = Box::pin(run_job(Arc::clone(&job.task), options, !job.failed_before));
        let result = locker.lock(job.task.lock_name(), mode, body).await;

        match result {
            Ok(summary) => {
                busy_streak = 0;
                job.attempts += 1;
                reports.push(job.report(JobOutcome::Completed, Some(summary)));
            }
            Err(e) if e.is_lock_busy() && mode == LockMode::NoWait => {
                busy_streak += 1;
                debug!(job_id = %job.task.id(), cache = job.task.lock_name(), "Cache busy, job moved to end of queue");
                queue.push_back(job);
            }
            Err(TaskError::Cancelled) => {
                job.attempts += 1;
                info!(job_id = %job.task.id(), "Job cancelled");
                reports.push(job.report(JobOutcome::Cancelled, None));
            }
            Err(e) => {
                busy_streak = 0;
                job.attempts += 1;
                job.failed_before = true;
                match options.retry.delay_after(job.attempts) {
                    Some(delay) => {
                        warn!(
                            job_id = %job.task.id(),
                            attempt = job.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Job failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = options.cancel.cancelled() => {}
                        }
                        queue.push_back(job);
                    }
                    None => {
                        error!(job_id = %job.task.id(), attempts = job.attempts, error = %e, "Job failed");
                        reports.push(job.report(JobOutcome::Failed(e.to_string()), None));
                    }
                }
            }
        }
    }

    reports.sort_by_key(|(index, _)| *index);
    let report = BatchReport {
        jobs: reports.into_iter().map(|(_, report)| report).collect(),
    };

    if report.is_success() {
        if let Some(store) = &options.progress_store {
            if let Err(e) = store.remove() {
                warn!(error = %e, "Unable to remove progress file");
            }
        }
    }
    info!(
        jobs = report.jobs.len(),
        failed = report.failed().count(),
        cancelled = report.was_cancelled(),
        "Batch finished"
    );
    report
}

/// Runs one attempt of a job. The caller holds the cache lock.
async fn run_job(
    task: Arc<dyn Task>,
    options: &BatchOptions,
    resume: bool,
) -> Result<WorkSummary, TaskError> {
    let started = Instant::now();
    let logger = options.logger.clone();
    if let Some(logger) = &logger {
        logger.set_current_task_id(Some(task.id()));
    }

    let checkpoint = if resume {
        options
            .progress_store
            .as_ref()
            .and_then(|store| store.get(task.id()))
    } else {
        None
    };

    info!(
        job_id = %task.id(),
        kind = %task.kind(),
        cache = task.manager().cache_name(),
        levels = ?task.levels(),
        coverage = %task.coverage(),
        resume = checkpoint.is_some(),
        "Starting job"
    );

    task.prepare();
    if let Some(result) = task.fast_path(options.dry_run, logger.as_deref()) {
        return result;
    }

    let queue = Arc::new(
        WorkerQueue::new(options.concurrency)
            .with_dry_run(options.dry_run)
            .with_logger(logger.clone())
            .with_cancellation(options.cancel.clone()),
    );
    let dispatcher = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.run().await })
    };

    let progress = TaskProgress::new(checkpoint).with_cancellation(options.cancel.clone());
    let walker = TileWalker::new(Arc::clone(&task), Arc::clone(&queue) as Arc<dyn WorkerPool>)
        .with_skip_geoms_for_last_levels(options.skip_geoms_for_last_levels)
        .with_logger(logger)
        .with_progress(progress);

    let walked = tokio::task::spawn_blocking(move || {
        let mut walker = walker;
        walker.walk()
    })
    .await
    .unwrap_or_else(|e| Err(TaskError::WorkerPool(format!("walker panicked: {}", e))));

    if walked.is_err() {
        queue.stop();
    }
    queue.close();

    let summary = dispatcher
        .await
        .map_err(|e| TaskError::WorkerPool(e.to_string()))??;
    task.manager().cleanup();

    if !walked? {
        return Err(TaskError::Cancelled);
    }
    if !summary.is_success() {
        return Err(TaskError::WorkFailures {
            failed: summary.failures.len(),
            total: summary.dispatched,
        });
    }

    info!(
        job_id = %task.id(),
        dispatched = summary.dispatched,
        tiles = summary.tiles,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Job finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::TaskCoverage;
    use crate::grid::{TileCoord, TileGrid};
    use crate::manager::MemoryTileManager;
    use crate::source::{SourceError, TileSource};
    use crate::task::error::LockError;
    use crate::task::locker::{BoxFuture, DummyCacheLocker, LockedResult};
    use crate::task::logger::TracingProgressLogger;
    use crate::task::progress::ProgressStep;
    use crate::task::store::FileProgressStore;
    use crate::task::TaskSpec;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct StaticSource;

    impl TileSource for StaticSource {
        fn fetch(&self, _coord: TileCoord) -> Result<Bytes, SourceError> {
            Ok(Bytes::from_static(b"img"))
        }
    }

    fn seeded_manager(name: &str) -> Arc<MemoryTileManager> {
        Arc::new(
            MemoryTileManager::new(name, TileGrid::global_geodetic())
                .with_source(Arc::new(StaticSource)),
        )
    }

    fn seed_task(id: &str, manager: Arc<MemoryTileManager>, coverage: TaskCoverage) -> SeedTask {
        SeedTask::new(TaskSpec::new(id, manager, vec![0, 1, 2], coverage))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_seed_fills_cache() {
        let mgr = seeded_manager("osm");
        let report = seed(
            vec![seed_task("osm-all", mgr.clone(), TaskCoverage::Full)],
            &BatchOptions::default(),
            &DummyCacheLocker,
        )
        .await;

        assert!(report.is_success());
        let job = report.get("osm-all").unwrap();
        assert_eq!(job.outcome, JobOutcome::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.summary.as_ref().unwrap().dispatched, 11);
        assert_eq!(mgr.len(), 1 + 2 + 8);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_cache_untouched() {
        let mgr = seeded_manager("osm");
        let options = BatchOptions::default().with_dry_run(true);
        let report = seed(
            vec![seed_task("dry", mgr.clone(), TaskCoverage::Full)],
            &options,
            &DummyCacheLocker,
        )
        .await;

        assert!(report.is_success());
        assert_eq!(report.jobs[0].summary.as_ref().unwrap().dispatched, 11);
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn test_empty_coverage_is_skipped() {
        let report = seed(
            vec![seed_task("none", seeded_manager("osm"), TaskCoverage::Empty)],
            &BatchOptions::default(),
            &DummyCacheLocker,
        )
        .await;
        assert_eq!(report.jobs[0].outcome, JobOutcome::Skipped);
        assert_eq!(report.jobs[0].attempts, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failing_job_exhausts_retries() {
        // no source: every load fails
        let mgr = Arc::new(MemoryTileManager::new("osm", TileGrid::global_geodetic()));
        let options = BatchOptions::default().with_retry(RetryPolicy::fixed(2, Duration::ZERO));
        let report = seed(
            vec![seed_task("broken", mgr, TaskCoverage::Full)],
            &options,
            &DummyCacheLocker,
        )
        .await;

        assert!(!report.is_success());
        let job = &report.jobs[0];
        assert_eq!(job.attempts, 2);
        assert!(matches!(&job.outcome, JobOutcome::Failed(msg) if msg.contains("work units failed")));
        assert_eq!(report.failed().count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_runs_nothing() {
        let mgr = seeded_manager("osm");
        let options = BatchOptions::default();
        options.cancel.cancel();
        let report = seed(
            vec![
                seed_task("a", mgr.clone(), TaskCoverage::Full),
                seed_task("b", mgr.clone(), TaskCoverage::Full),
            ],
            &options,
            &DummyCacheLocker,
        )
        .await;

        assert!(report.was_cancelled());
        assert!(report.jobs.iter().all(|j| j.outcome == JobOutcome::Cancelled));
        assert!(mgr.is_empty());
    }

    /// Reports the first non-waiting attempt on `busy` as contention.
    struct BusyOnceLocker {
        busy: String,
        reported: Mutex<bool>,
        calls: Mutex<Vec<(String, LockMode)>>,
    }

    impl BusyOnceLocker {
        fn new(busy: &str) -> Self {
            Self {
                busy: busy.to_string(),
                reported: Mutex::new(false),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CacheLocker for BusyOnceLocker {
        fn lock<'a>(
            &'a self,
            name: &'a str,
            mode: LockMode,
            body: BoxFuture<'a, LockedResult>,
        ) -> BoxFuture<'a, LockedResult> {
            self.calls.lock().push((name.to_string(), mode));
            let mut reported = self.reported.lock();
            if name == self.busy && mode == LockMode::NoWait && !*reported {
                *reported = true;
                return Box::pin(async move {
                    Err::<WorkSummary, _>(TaskError::Lock(LockError::Busy {
                        name: name.to_string(),
                    }))
                });
            }
            body
        }
    }

    #[tokio::test]
    async fn test_busy_cache_rotates_job() {
        let a = seeded_manager("a");
        let b = seeded_manager("b");
        let locker = BusyOnceLocker::new("a");
        let report = seed(
            vec![
                seed_task("job-a", a.clone(), TaskCoverage::Full),
                seed_task("job-b", b.clone(), TaskCoverage::Full),
            ],
            &BatchOptions::default(),
            &locker,
        )
        .await;

        assert!(report.is_success());
        // reports stay in submission order
        assert_eq!(report.jobs[0].id, "job-a");
        assert_eq!(report.jobs[0].attempts, 1);

        let calls = locker.calls.lock();
        assert_eq!(
            *calls,
            vec![
                ("a".to_string(), LockMode::NoWait),
                ("b".to_string(), LockMode::NoWait),
                ("a".to_string(), LockMode::Wait),
            ]
        );
    }

    #[tokio::test]
    async fn test_resume_skips_finished_subtrees() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let store = Arc::new(FileProgressStore::open(&path, true));
        // level 1 tile 0 is done, continue with tile 1
        store.add("resume", Some(vec![ProgressStep::new(0, 1), ProgressStep::new(1, 2)]));

        let mgr = seeded_manager("osm");
        let logger = TracingProgressLogger::default().with_store(store.clone());
        let options = BatchOptions::default()
            .with_progress_store(store)
            .with_logger(Arc::new(logger));
        let report = seed(
            vec![seed_task("resume", mgr.clone(), TaskCoverage::Full)],
            &options,
            &DummyCacheLocker,
        )
        .await;

        assert!(report.is_success());
        // 1 + 2 tiles for levels 0 and 1, only the east half of level 2
        assert_eq!(mgr.len(), 1 + 2 + 4);
        assert!(mgr.contains(TileCoord::new(3, 1, 2)));
        assert!(!mgr.contains(TileCoord::new(0, 1, 2)));
        // checkpoints are dropped after a successful batch
        assert!(!path.exists());
    }
}
