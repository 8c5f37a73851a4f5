//! Cache-level mutual exclusion.
//!
//! Only one job may work on a cache at a time. [`LocalCacheLocker`] enforces
//! this inside the process with a [`LockRegistry`] of async mutexes and across
//! processes with an advisory `flock` on `{dir}/{cache}.lck`.
//!
//! # Example
//!
//! ```ignore
//! let locker = LocalCacheLocker::new(lock_dir, Arc::new(LockRegistry::new()));
//! let summary = locker
//!     .lock("osm", LockMode::Wait, Box::pin(async { run_job().await }))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::error::{LockError, TaskError};
use super::queue::WorkSummary;

/// Default time to wait for a lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between lock file attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A boxed future that can be sent across threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a locked job body.
pub type LockedResult = Result<WorkSummary, TaskError>;

/// Whether to wait for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Wait up to the locker's timeout.
    Wait,
    /// Fail with [`LockError::Busy`] if the lock is held.
    NoWait,
}

/// Runs job bodies while holding a named lock.
pub trait CacheLocker: Send + Sync {
    /// Acquires the lock `name`, runs `body` and releases the lock.
    fn lock<'a>(
        &'a self,
        name: &'a str,
        mode: LockMode,
        body: BoxFuture<'a, LockedResult>,
    ) -> BoxFuture<'a, LockedResult>;
}

/// Locker that never locks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyCacheLocker;

impl CacheLocker for DummyCacheLocker {
    fn lock<'a>(
        &'a self,
        _name: &'a str,
        _mode: LockMode,
        body: BoxFuture<'a, LockedResult>,
    ) -> BoxFuture<'a, LockedResult> {
        body
    }
}

/// In-process locks keyed by name, created on first use.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `name`, creating it if needed.
    pub fn get(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Number of known lock names.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// Locker combining a [`LockRegistry`] with lock files in a directory.
pub struct LocalCacheLocker {
    dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
    registry: Arc<LockRegistry>,
}

impl LocalCacheLocker {
    /// Creates a locker writing lock files to `dir`.
    ///
    /// Lockers sharing `registry` exclude each other without touching the
    /// file system first.
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<LockRegistry>) -> Self {
        Self {
            dir: dir.into(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            registry,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Path of the lock file for `name`.
    ///
    /// Bytes outside `[A-Za-z0-9.-]` are written as `_XX` hex escapes, so
    /// distinct cache names never share a lock file.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        let mut file_name = String::with_capacity(name.len());
        for byte in name.bytes() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
                file_name.push(byte as char);
            } else {
                file_name.push_str(&format!("_{:02X}", byte));
            }
        }
        self.dir.join(format!("{}.lck", file_name))
    }

    async fn acquire(&self, name: &str, mode: LockMode) -> Result<HeldLock, LockError> {
        let deadline = Instant::now() + self.timeout;
        let busy = || LockError::Busy {
            name: name.to_string(),
        };

        let mutex = self.registry.get(name);
        let local = match mode {
            LockMode::NoWait => mutex.try_lock_owned().map_err(|_| busy())?,
            LockMode::Wait => tokio::time::timeout_at(deadline, mutex.lock_owned())
                .await
                .map_err(|_| busy())?,
        };

        let file = self.lock_file(name, mode, deadline).await?;
        debug!(lock = name, "Acquired cache lock");
        Ok(HeldLock {
            _file: file,
            _local: local,
        })
    }

    async fn lock_file(
        &self,
        name: &str,
        mode: LockMode,
        deadline: Instant,
    ) -> Result<FileLock, LockError> {
        fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.lock_path(name);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        loop {
            if FileLock::try_lock(&file).map_err(io_err)? {
                return Ok(FileLock { file });
            }

            let now = Instant::now();
            if mode == LockMode::NoWait || now >= deadline {
                return Err(LockError::Busy {
                    name: name.to_string(),
                });
            }
            trace!(lock = name, path = %path.display(), "Lock file held, polling");
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

impl CacheLocker for LocalCacheLocker {
    fn lock<'a>(
        &'a self,
        name: &'a str,
        mode: LockMode,
        body: BoxFuture<'a, LockedResult>,
    ) -> BoxFuture<'a, LockedResult> {
        Box::pin(async move {
            let _held = self.acquire(name, mode).await?;
            body.await
        })
    }
}

/// Both halves of an acquired lock. Dropping releases them.
struct HeldLock {
    _file: FileLock,
    _local: OwnedMutexGuard<()>,
}

/// Exclusive advisory lock on an open file.
#[cfg_attr(not(unix), allow(dead_code))]
struct FileLock {
    file: File,
}

#[cfg(unix)]
impl FileLock {
    /// Returns false if another open file holds the lock.
    fn try_lock(file: &File) -> std::io::Result<bool> {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
impl FileLock {
    // no advisory file locks; the registry still serializes this process
    fn try_lock(_file: &File) -> std::io::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ok_body<'a>() -> BoxFuture<'a, LockedResult> {
        Box::pin(async { Ok::<_, TaskError>(WorkSummary::default()) })
    }

    #[tokio::test]
    async fn test_dummy_runs_body() {
        let result = DummyCacheLocker
            .lock("osm", LockMode::NoWait, Box::pin(async { Err::<WorkSummary, _>(TaskError::Cancelled) }))
            .await;
        assert!(matches!(result, Err(TaskError::Cancelled)));
        assert!(DummyCacheLocker
            .lock("osm", LockMode::Wait, ok_body())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_registry_creates_locks_lazily() {
        let registry = LockRegistry::new();
        assert!(registry.is_empty());
        let a = registry.get("osm");
        let b = registry.get("osm");
        assert!(Arc::ptr_eq(&a, &b));
        registry.get("aerial");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_creates_lock_file() {
        let dir = TempDir::new().unwrap();
        let locker = LocalCacheLocker::new(dir.path().join("locks"), Arc::new(LockRegistry::new()));
        locker.lock("osm/png", LockMode::Wait, ok_body()).await.unwrap();
        assert!(dir.path().join("locks").join("osm_2Fpng.lck").exists());
    }

    #[test]
    fn test_lock_paths_do_not_collide() {
        let locker = LocalCacheLocker::new("/tmp/locks", Arc::new(LockRegistry::new()));
        assert_eq!(locker.lock_path("osm.v2-png"), PathBuf::from("/tmp/locks/osm.v2-png.lck"));
        assert_eq!(locker.lock_path("osm_png"), PathBuf::from("/tmp/locks/osm_5Fpng.lck"));
        assert_ne!(locker.lock_path("osm/png"), locker.lock_path("osm_png"));
        assert_ne!(locker.lock_path("osm png"), locker.lock_path("osm_20png"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_similar_names_lock_independently() {
        let dir = TempDir::new().unwrap();
        let first = LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new()));
        let second = LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new()));

        let _held = first.acquire("osm/png", LockMode::Wait).await.unwrap();
        second.lock("osm_png", LockMode::NoWait, ok_body()).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_wait_reports_busy() {
        let dir = TempDir::new().unwrap();
        let locker = LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new()));

        let held = locker.acquire("osm", LockMode::Wait).await.unwrap();
        let result = locker.lock("osm", LockMode::NoWait, ok_body()).await;
        assert!(result.unwrap_err().is_lock_busy());

        // other caches are unaffected
        locker.lock("aerial", LockMode::NoWait, ok_body()).await.unwrap();

        drop(held);
        locker.lock("osm", LockMode::NoWait, ok_body()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let dir = TempDir::new().unwrap();
        let locker = LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new()))
            .with_timeout(Duration::from_millis(50));

        let _held = locker.acquire("osm", LockMode::Wait).await.unwrap();
        let started = std::time::Instant::now();
        let result = locker.lock("osm", LockMode::Wait, ok_body()).await;
        assert!(result.unwrap_err().is_lock_busy());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_same_name_runs_serially() {
        let dir = TempDir::new().unwrap();
        let locker = Arc::new(LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new())));
        let events = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..2)
            .map(|id| {
                let locker = Arc::clone(&locker);
                let events = Arc::clone(&events);
                tokio::spawn(async move {
                    let body = Box::pin(async move {
                        events.lock().push((id, "start"));
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        events.lock().push((id, "end"));
                        Ok::<_, TaskError>(WorkSummary::default())
                    });
                    locker.lock("osm", LockMode::Wait, body).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].0, events[1].0);
        assert_eq!(events[1].1, "end");
        assert_eq!(events[2].0, events[3].0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lock_file_excludes_other_registries() {
        let dir = TempDir::new().unwrap();
        let first = LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new()));
        let second = LocalCacheLocker::new(dir.path(), Arc::new(LockRegistry::new()))
            .with_timeout(Duration::from_millis(30))
            .with_poll_interval(Duration::from_millis(5));

        let held = first.acquire("osm", LockMode::Wait).await.unwrap();
        let result = second.lock("osm", LockMode::Wait, ok_body()).await;
        assert!(result.unwrap_err().is_lock_busy());

        drop(held);
        second.lock("osm", LockMode::NoWait, ok_body()).await.unwrap();
    }
}
