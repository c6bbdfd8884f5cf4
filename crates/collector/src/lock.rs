//! Cross-process run lock for single-instance backfill.
//!
//! A plain lock file created with create-exclusive semantics, so two
//! processes racing for the lock cannot both win. A lock older than the
//! staleness timeout was left by a dead process and is reclaimed once.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Default staleness timeout: ten minutes from the lock file's mtime.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum LockError {
    /// Another live instance holds the lock. Expected, not a failure to retry.
    #[error("backfill already running (lock held by pid {holder_pid:?}, age {age_secs}s)")]
    Held {
        holder_pid: Option<u32>,
        age_secs: u64,
    },

    /// Filesystem error while creating, inspecting, or removing the lock.
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A run-lock slot at a fixed path.
#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
    stale_after: Duration,
}

/// A held lock. Dropping it releases the file.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Creates a lock slot with the default staleness timeout.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Overrides the staleness timeout.
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Attempts to acquire the lock.
    ///
    /// Creation is atomic (`create_new`), so the check-then-create race
    /// cannot hand the lock to two processes. If a lock already exists and
    /// exceeds the staleness timeout it is reclaimed with a warning and
    /// acquisition is retried exactly once.
    ///
    /// # Errors
    /// [`LockError::Held`] when a live instance owns the lock; I/O errors
    /// otherwise.
    pub fn acquire(&self) -> Result<RunLockGuard, LockError> {
        match self.try_create() {
            Ok(guard) => Ok(guard),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let age = self.lock_age()?;
                if age > self.stale_after {
                    tracing::warn!(
                        "Reclaiming stale backfill lock at {} (age {}s > {}s)",
                        self.path.display(),
                        age.as_secs(),
                        self.stale_after.as_secs()
                    );
                    // Remove and retry once; losing the second race means a
                    // live instance beat us to it.
                    match fs::remove_file(&self.path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    match self.try_create() {
                        Ok(guard) => Ok(guard),
                        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                            Err(self.held_error())
                        }
                        Err(e) => Err(e.into()),
                    }
                } else {
                    Err(self.held_error())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(&self) -> std::io::Result<RunLockGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        write!(file, "pid:{}\ntime:{}", std::process::id(), now)?;
        file.sync_all()?;

        Ok(RunLockGuard {
            path: self.path.clone(),
            released: false,
        })
    }

    fn lock_age(&self) -> Result<Duration, LockError> {
        let metadata = fs::metadata(&self.path)?;
        let modified = metadata.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }

    fn held_error(&self) -> LockError {
        let age_secs = self.lock_age().map(|a| a.as_secs()).unwrap_or(0);
        LockError::Held {
            holder_pid: read_holder_pid(&self.path),
            age_secs,
        }
    }

    /// True when a lock file currently exists at this slot.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.path.exists()
    }
}

/// Best-effort pid extraction from the `pid:<pid>\ntime:<secs>` payload.
///
/// An unreadable or malformed payload is not an error: presence of the file
/// is what marks the lock held, the pid only decorates diagnostics.
fn read_holder_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents
        .lines()
        .find_map(|line| line.strip_prefix("pid:"))
        .and_then(|pid| pid.trim().parse().ok())
}

impl RunLockGuard {
    /// Releases the lock explicitly.
    ///
    /// # Errors
    /// Returns an error if the lock file cannot be removed.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Interrupted or panicking path: a leaked lock blocks every future
        // run until the staleness timeout, so removal happens here too.
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(
                    "Failed to release backfill lock at {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
