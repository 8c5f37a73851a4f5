//! Resumable walk progress.
//!
//! The tile walker descends the tile pyramid level by level. At each level
//! it visits the candidate meta-tiles of the parent in a fixed raster order.
//! The position inside the walk is therefore fully described by the list of
//! `(index, total)` pairs of all ancestors: the *progress path*.
//!
//! Progress paths are persisted while a job runs. A restarted job compares
//! each path it reaches with the persisted one and skips all subtrees that
//! lie before it.
//!
//! # Example
//!
//! ```
//! use tileseed::task::{ProgressStep, TaskProgress};
//!
//! let mut progress = TaskProgress::new(Some(vec![ProgressStep::new(1, 2)]));
//! let skipped = progress.step_down(0, 2, |p| Ok::<_, ()>(p.already_processed()));
//! assert_eq!(skipped, Ok(true));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Status characters from "just started" to "almost done".
const STATUS_SYMBOLS: [char; 5] = [' ', '.', 'o', 'O', '0'];

/// Position among the siblings of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgressStep {
    /// Zero-based sibling index.
    pub index: u32,
    /// Number of siblings.
    pub total: u32,
}

impl ProgressStep {
    pub const fn new(index: u32, total: u32) -> Self {
        Self { index, total }
    }
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.index, self.total)
    }
}

/// Returns true if a walk at `current` can skip its subtree because the
/// checkpoint `old` lies beyond it.
///
/// Paths are compared pair by pair from the root; the first differing pair
/// decides. A missing current path never skips, an empty (but present)
/// checkpoint always skips.
pub fn can_skip(old: Option<&[ProgressStep]>, current: Option<&[ProgressStep]>) -> bool {
    let (Some(old), Some(current)) = (old, current) else {
        return false;
    };
    if old.is_empty() {
        return true;
    }

    for i in 0..old.len().max(current.len()) {
        match (old.get(i), current.get(i)) {
            (Some(o), Some(c)) => match o.cmp(c) {
                Ordering::Less => return false,
                Ordering::Greater => return true,
                Ordering::Equal => {}
            },
            _ => return false,
        }
    }
    false
}

/// Status character for sibling `index` of `total`.
pub fn status_symbol(index: usize, total: usize) -> char {
    let position = index + 1;
    if total == 0 || position > total {
        return 'X';
    }
    let bucket = (position as f64 / (total as f64 / 4.0)).ceil() as usize;
    STATUS_SYMBOLS[bucket.min(STATUS_SYMBOLS.len() - 1)]
}

/// Estimated time of arrival, extrapolated from the progress rate so far.
#[derive(Debug, Clone)]
pub struct Eta {
    started: Instant,
    progress: f64,
}

impl Eta {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            progress: 0.0,
        }
    }

    /// Records the current completion fraction.
    pub fn update(&mut self, progress: f64) {
        self.progress = progress;
    }

    /// Estimated remaining time, `None` before any progress was made.
    pub fn remaining(&self) -> Option<Duration> {
        if self.progress <= 0.0 {
            return None;
        }
        if self.progress >= 1.0 {
            return Some(Duration::ZERO);
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        Some(Duration::from_secs_f64(
            elapsed * (1.0 - self.progress) / self.progress,
        ))
    }
}

impl Default for Eta {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(remaining) = self.remaining() else {
            return write!(f, "N/A");
        };
        let arrival = chrono::Duration::from_std(remaining)
            .ok()
            .and_then(|d| chrono::Local::now().checked_add_signed(d));
        match arrival {
            Some(at) => write!(f, "{}", at.format("%Y-%m-%d-%H:%M:%S")),
            None => write!(f, "?"),
        }
    }
}

/// Mutable state of one tile walk.
///
/// Owned by the walker for the duration of a walk; never shared between
/// concurrent walks.
#[derive(Debug)]
pub struct TaskProgress {
    progress: f64,
    level_fractions: Vec<f64>,
    current: Option<Vec<ProgressStep>>,
    depth: usize,
    status: String,
    old: Option<Vec<ProgressStep>>,
    eta: Eta,
    cancel: CancellationToken,
}

impl TaskProgress {
    /// Creates progress for a fresh walk, optionally resuming from the
    /// checkpoint `old`.
    pub fn new(old: Option<Vec<ProgressStep>>) -> Self {
        Self {
            progress: 0.0,
            level_fractions: vec![1.0],
            current: None,
            depth: 0,
            status: String::new(),
            old,
            eta: Eta::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to cancel the walk.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Completed fraction of the walk in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// One status character per active level.
    pub fn status_str(&self) -> &str {
        &self.status
    }

    pub fn eta(&self) -> &Eta {
        &self.eta
    }

    /// Path of the node currently visited.
    pub fn current_path(&self) -> Option<&[ProgressStep]> {
        self.current.as_deref()
    }

    /// Checkpoint this walk resumes from.
    pub fn old_path(&self) -> Option<&[ProgressStep]> {
        self.old.as_deref()
    }

    /// Returns true once the cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Requests cancellation of the walk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs `body` one level deeper, at sibling `index` of `total`.
    ///
    /// The path is truncated to the current depth before the new step is
    /// pushed. When `body` returns `Ok(true)` the level is left again; on
    /// `Ok(false)` (cancellation) or an error the path keeps pointing at the
    /// deepest visited node so it can be persisted.
    pub fn step_down<F, E>(&mut self, index: usize, total: usize, body: F) -> Result<bool, E>
    where
        F: FnOnce(&mut Self) -> Result<bool, E>,
    {
        let path = self.current.get_or_insert_with(Vec::new);
        path.truncate(self.depth);
        path.push(ProgressStep::new(index as u32, total as u32));
        self.depth += 1;
        self.status.push(status_symbol(index, total));
        let fraction = self.level_fraction() / total.max(1) as f64;
        self.level_fractions.push(fraction);

        if !body(self)? {
            return Ok(false);
        }

        self.level_fractions.pop();
        self.status.pop();
        self.depth -= 1;
        if self.depth == 0 {
            self.current = Some(Vec::new());
        }
        Ok(true)
    }

    /// Returns true if the checkpoint lies beyond the current node.
    pub fn already_processed(&self) -> bool {
        can_skip(self.old.as_deref(), self.current.as_deref())
    }

    /// Path to persist as checkpoint.
    ///
    /// While the walk is still catching up with the old checkpoint, the old
    /// checkpoint is returned.
    pub fn current_progress_identifier(&self) -> Option<Vec<ProgressStep>> {
        if self.already_processed() || self.current.is_none() {
            return self.old.clone();
        }
        self.current.clone()
    }

    /// Marks `1 / subtiles` of the current level as done.
    pub fn step_forward(&mut self, subtiles: usize) {
        self.progress += self.level_fraction() / subtiles.max(1) as f64;
        self.eta.update(self.progress);
    }

    fn level_fraction(&self) -> f64 {
        self.level_fractions.last().copied().unwrap_or(1.0)
    }
}

impl Default for TaskProgress {
    fn default() -> Self {
        Self::new(None)
    }
}
