//! Persistence of walk checkpoints between runs.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::error::StoreError;
use super::progress::ProgressStep;

/// Checkpoint storage keyed by task id.
pub trait ProgressStore: Send + Sync {
    /// Checkpoint of `task_id`, if any.
    fn get(&self, task_id: &str) -> Option<Vec<ProgressStep>>;

    /// Records the checkpoint of `task_id` in memory.
    fn add(&self, task_id: &str, path: Option<Vec<ProgressStep>>);

    /// Persists all recorded checkpoints.
    fn write(&self) -> Result<(), StoreError>;

    /// Forgets all checkpoints and deletes persisted state.
    fn remove(&self) -> Result<(), StoreError>;
}

type ProgressMap = BTreeMap<String, Option<Vec<ProgressStep>>>;

/// JSON file progress store.
///
/// The file is replaced atomically on every write. Unreadable or
/// world-writable files are ignored when loading.
pub struct FileProgressStore {
    path: PathBuf,
    status: Mutex<ProgressMap>,
}

impl FileProgressStore {
    /// Opens the store at `path`. With `resume` false, existing checkpoints
    /// are not loaded and get overwritten on the next write.
    pub fn open(path: impl Into<PathBuf>, resume: bool) -> Self {
        let path = path.into();
        let status = if resume { load(&path) } else { ProgressMap::new() };
        Self {
            path,
            status: Mutex::new(status),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressStore for FileProgressStore {
    fn get(&self, task_id: &str) -> Option<Vec<ProgressStep>> {
        self.status.lock().get(task_id).cloned().flatten()
    }

    fn add(&self, task_id: &str, path: Option<Vec<ProgressStep>>) {
        self.status.lock().insert(task_id.to_string(), path);
    }

    fn write(&self) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(&*self.status.lock())?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&data).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        debug!(path = %self.path.display(), "Wrote progress file");
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        self.status.lock().clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&self.path)(e)),
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

fn load(path: &Path) -> ProgressMap {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return ProgressMap::new(),
    };

    if is_world_writable(&metadata) {
        error!(path = %path.display(), "Progress file is world writable, ignoring file");
        return ProgressMap::new();
    }

    match fs::read(path).map(|data| serde_json::from_slice::<ProgressMap>(&data)) {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            error!(path = %path.display(), error = %e, "Unable to parse progress file, ignoring file");
            ProgressMap::new()
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Unable to read progress file, ignoring file");
            ProgressMap::new()
        }
    }
}

#[cfg(unix)]
fn is_world_writable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o002 != 0
}

#[cfg(not(unix))]
fn is_world_writable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn steps() -> Vec<ProgressStep> {
        vec![ProgressStep::new(0, 1), ProgressStep::new(1, 2)]
    }

    #[test]
    fn test_write_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");

        let store = FileProgressStore::open(&path, true);
        store.add("seed-a", Some(steps()));
        store.add("seed-b", None);
        store.write().unwrap();
        assert!(!dir.path().join("progress.json.tmp").exists());

        let reloaded = FileProgressStore::open(&path, true);
        assert_eq!(reloaded.get("seed-a"), Some(steps()));
        assert_eq!(reloaded.get("seed-b"), None);
        assert_eq!(reloaded.get("unknown"), None);
    }

    #[test]
    fn test_open_without_resume_ignores_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let store = FileProgressStore::open(&path, true);
        store.add("seed-a", Some(steps()));
        store.write().unwrap();

        let fresh = FileProgressStore::open(&path, false);
        assert_eq!(fresh.get("seed-a"), None);
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, b"not json").unwrap();
        let store = FileProgressStore::open(&path, true);
        assert_eq!(store.get("seed-a"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_world_writable_file_is_ignored() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let store = FileProgressStore::open(&path, true);
        store.add("seed-a", Some(steps()));
        store.write().unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        let reloaded = FileProgressStore::open(&path, true);
        assert_eq!(reloaded.get("seed-a"), None);
    }

    #[test]
    fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let store = FileProgressStore::open(&path, true);
        store.add("seed-a", Some(steps()));
        store.write().unwrap();

        store.remove().unwrap();
        assert!(!path.exists());
        assert_eq!(store.get("seed-a"), None);
        // removing twice is fine
        store.remove().unwrap();
    }
}
