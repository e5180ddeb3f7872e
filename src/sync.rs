//! Cross-process worker synchronization over the filesystem.
//!
//! Multiple independent worker processes coordinate one shared test run
//! with nothing but atomic filesystem operations: a marker file per live
//! worker (existence-only, fixed prefix plus a random suffix) and a single
//! well-known file holding the shared run id. Every write is an
//! exclusive-create or a single-file remove, so no in-process locking is
//! needed: the filesystem's atomic create/remove is the entire
//! synchronization primitive.
//!
//! Failure model: processes may crash without cleanup, the filesystem is
//! otherwise reliable. A worker killed between [`SyncLock::lock`] and
//! [`SyncLock::unlock`] leaks its marker and "last worker" never triggers;
//! that is an accepted limitation, not silently handled. All operations
//! here are best-effort: a missing file on read is `None`, deleting an
//! already-missing file is a no-op, because any sibling may have performed
//! the cleanup already.

use std::fs;
use std::io::ErrorKind;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Fixed name prefix of per-worker marker files.
pub const MARKER_PREFIX: &str = ".runlink_worker_";

/// Fixed name of the shared run-id file.
pub const RUN_ID_FILE: &str = ".runlink_run_id";

/// One coordinating process's presence token and its access to the shared
/// run-id storage.
///
/// The number of live marker files at any instant equals the number of
/// workers currently between `lock()` and `unlock()`.
#[derive(Debug)]
pub struct SyncLock {
    worker_id: String,
    marker_dir: PathBuf,
    run_id_path: PathBuf,
    max_jitter_ms: u64,
    run_id: Option<String>,
}

impl SyncLock {
    /// A lock with the default layout: markers in the working directory,
    /// the run-id file in the shared OS temp directory.
    pub fn new() -> Self {
        Self::with_dirs(PathBuf::from("."), std::env::temp_dir())
    }

    /// A lock with explicit marker and run-id directories.
    pub fn with_dirs(marker_dir: impl Into<PathBuf>, sync_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            marker_dir: marker_dir.into(),
            run_id_path: sync_dir.into().join(RUN_ID_FILE),
            max_jitter_ms: 1000,
            run_id: None,
        }
    }

    /// Caps the random pre-lock jitter; zero disables it.
    pub fn with_jitter_ms(mut self, max_jitter_ms: u64) -> Self {
        self.max_jitter_ms = max_jitter_ms;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn marker_path(&self) -> PathBuf {
        self.marker_dir.join(format!("{MARKER_PREFIX}{}", self.worker_id))
    }

    fn live_marker_count(&self) -> usize {
        count_markers(&self.marker_dir)
    }

    /// Registers this worker and reports whether it was the first one.
    ///
    /// Sleeps a small random jitter to desynchronize workers started at the
    /// same instant (a probability-shaping heuristic against the
    /// directory-listing race, not a correctness guarantee), then counts
    /// existing markers, creates this worker's own, and returns whether the
    /// pre-creation count was zero.
    pub fn lock(&mut self) -> bool {
        if self.max_jitter_ms > 0 {
            let jitter = rand::thread_rng().gen_range(1..=self.max_jitter_ms);
            std::thread::sleep(Duration::from_millis(jitter));
        }

        let is_first = self.live_marker_count() == 0;
        let marker = self.marker_path();
        if let Err(err) = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
        {
            warn!("Failed to create worker marker {}: {}", marker.display(), err);
        }
        debug!(worker = %self.worker_id, is_first, "worker locked");
        is_first
    }

    /// Deregisters this worker and reports whether it was the last one.
    ///
    /// Removes this worker's marker, then counts the remaining live
    /// markers; true iff zero remain.
    pub fn unlock(&mut self) -> bool {
        let marker = self.marker_path();
        if let Err(err) = fs::remove_file(&marker) {
            if err.kind() != ErrorKind::NotFound {
                warn!("Failed to remove worker marker {}: {}", marker.display(), err);
            }
        }
        let is_last = self.live_marker_count() == 0;
        debug!(worker = %self.worker_id, is_last, "worker unlocked");
        is_last
    }

    /// Persists the run id for sibling processes, first writer wins.
    ///
    /// Exclusive-create semantics: if a sibling already wrote the file this
    /// neither raises nor overwrites; callers converge on the sibling's
    /// value through [`SyncLock::get_run_id`].
    pub fn save_run_id(&mut self, run_id: &str) {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.run_id_path)
        {
            Ok(mut file) => {
                if let Err(err) = file.write_all(run_id.as_bytes()) {
                    warn!("Failed to write run id file: {}", err);
                } else {
                    self.run_id = Some(run_id.to_string());
                }
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                debug!("run id file already written by a sibling");
            }
            Err(err) => warn!("Failed to create run id file: {}", err),
        }
    }

    /// Reads the persisted run id; `None` when no sibling has written one.
    pub fn get_run_id(&mut self) -> Option<String> {
        if self.run_id.is_some() {
            return self.run_id.clone();
        }
        match fs::read_to_string(&self.run_id_path) {
            Ok(contents) => {
                let id = contents.trim().to_string();
                if id.is_empty() {
                    return None;
                }
                self.run_id = Some(id.clone());
                Some(id)
            }
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    warn!("Failed to read run id file: {}", err);
                }
                None
            }
        }
    }

    /// Deletes the persisted run id. A missing file is a no-op, since any
    /// sibling may already have cleaned up.
    pub fn clear_run_id(&mut self) {
        self.run_id = None;
        if let Err(err) = fs::remove_file(&self.run_id_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!("Failed to remove run id file: {}", err);
            }
        }
    }
}

impl Default for SyncLock {
    fn default() -> Self {
        Self::new()
    }
}

fn count_markers(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(MARKER_PREFIX)
        })
        .count()
}
