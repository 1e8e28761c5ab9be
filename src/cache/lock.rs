//! Advisory File Lock
//!
//! Cross-process mutual exclusion based on exclusive file creation.
//!
//! # Design
//!
//! - Acquire: `O_CREAT | O_EXCL` on the lock path; an existing file means
//!   another holder, so poll with exponential backoff until the deadline
//! - Release: delete the lock file when the guard is dropped, on every exit
//!   path including unwinding
//! - The holder's pid is written into the file to help diagnose stale locks

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// First wait between acquisition attempts
const INITIAL_BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound on the wait between acquisition attempts
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// RAII guard for an exclusive advisory lock file
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting at most `timeout`.
    pub fn acquire(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let path = path.into();
        let deadline = Instant::now() + timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if Self::try_create(&path)? {
                return Ok(Self { path });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Lock {} still held by pid {} after {:?}",
                    path.display(),
                    Self::holder(&path).as_deref().unwrap_or("unknown"),
                    timeout
                );
                return Err(Error::LockTimeout { path, timeout });
            }

            thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Try to acquire the lock once without waiting.
    pub fn try_acquire(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        if Self::try_create(&path)? {
            Ok(Some(Self { path }))
        } else {
            Ok(None)
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(path: &Path) -> Result<bool> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                // Best effort: the lock is held even if the pid cannot be written.
                let _ = write!(file, "{}", std::process::id());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn holder(path: &Path) -> Option<String> {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Lock {} vanished before release", self.path.display())
            }
            Err(e) => warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
