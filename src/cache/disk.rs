//! Disk Tier - Byte-Bounded Shard
//!
//! One directory of cached files with a persisted LRU index, shared safely by
//! every process that opens the same directory.
//!
//! # Design
//!
//! - Every operation is one critical section: in-process mutex, then the
//!   shard's lock file, then a fresh read of the index
//! - Mutations rewrite the whole index before the lock is released
//! - Incoming files are staged next to their destination and renamed into
//!   place, so readers never observe a partially copied file
//! - An object larger than the shard fails fast instead of evicting forever

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::index::{DiskIndex, DiskIndexEntry};
use super::lock::FileLock;
use super::{validate_key, DEFAULT_LOCK_TIMEOUT, INDEX_FILE, LOCK_FILE};
use crate::error::{Error, Result};

/// Result of an index lookup inside the critical section
enum Lookup {
    Hit(PathBuf),
    MissingFile(PathBuf),
    Absent,
}

/// Disk-backed LRU over the files of one shard directory
pub struct DiskShard {
    /// Shard directory
    dir: PathBuf,
    /// Maximum total file size in bytes
    capacity: u64,
    /// Bound on lock acquisition
    lock_timeout: Duration,
    /// Index as of this process's last critical section
    view: Mutex<DiskIndex>,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl DiskShard {
    /// Open (or create) a shard with the default lock timeout
    pub fn open(dir: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        Self::open_with_timeout(dir, capacity, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open (or create) a shard directory.
    ///
    /// Loads the persisted index, or initializes and persists an empty one.
    pub fn open_with_timeout(
        dir: impl Into<PathBuf>,
        capacity: u64,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let dir = dir.into();
        if capacity == 0 {
            return Err(Error::Config(format!(
                "shard {} must have a capacity of at least 1 byte",
                dir.display()
            )));
        }

        fs::create_dir_all(&dir)?;

        let shard = Self {
            dir,
            capacity,
            lock_timeout,
            view: Mutex::new(DiskIndex::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        };
        shard.critical_section(|_| Ok(((), false)))?;

        debug!(
            "Opened shard {} ({} entries, {}/{} bytes)",
            shard.dir.display(),
            shard.len(),
            shard.size(),
            shard.capacity
        );
        Ok(shard)
    }

    /// Get the local path of a cached file, marking it most recently used.
    ///
    /// A key whose backing file has disappeared is a miss; its index entry is
    /// left for the next `set` to replace.
    pub fn get(&self, key: &str) -> Result<Option<PathBuf>> {
        let lookup = self.critical_section(|index| {
            let Some(entry) = index.touch(key) else {
                return Ok((Lookup::Absent, false));
            };
            let path = self.dir.join(&entry.filename);
            let lookup = if path.is_file() {
                Lookup::Hit(path)
            } else {
                Lookup::MissingFile(path)
            };
            Ok((lookup, true))
        })?;

        match lookup {
            Lookup::Hit(path) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(path))
            }
            Lookup::MissingFile(path) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Index lists {} but {} is missing; treating as miss",
                    key,
                    path.display()
                );
                Ok(None)
            }
            Lookup::Absent => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Copy `source` into the shard under `key`, evicting least recently
    /// used files until it fits.
    ///
    /// Returns the number of evicted entries.
    pub fn set(&self, key: &str, source: &Path) -> Result<usize> {
        validate_key(key)?;
        let dest = self.dir.join(key);

        // Re-inserting the shard's own copy only refreshes the entry.
        let in_place = same_file(source, &dest);
        let (staged, size) = if in_place {
            (None, fs::metadata(&dest)?.len())
        } else {
            let (tmp, size) = self.stage(source)?;
            (Some(tmp), size)
        };

        if size > self.capacity {
            return Err(Error::CapacityOverflow {
                key: key.to_string(),
                size,
                capacity: self.capacity,
            });
        }

        let outcome = self.critical_section(|index| {
            if let Some(old) = index.remove(key) {
                if old.filename != key {
                    self.remove_file(&old.filename);
                }
            }

            let evicted = self.evict_to_fit(index, size);

            if let Some(tmp) = staged {
                if let Err(e) = tmp.persist(&dest) {
                    // Evictions are already done; persist them regardless.
                    return Ok((Err(Error::Io(e.error)), true));
                }
            }

            index.push(DiskIndexEntry::new(key, size));
            Ok((Ok(evicted), true))
        })?;

        let evicted = outcome?;
        debug!(
            "Stored {} ({} bytes) in shard {}, evicted {}",
            key,
            size,
            self.dir.display(),
            evicted
        );
        Ok(evicted)
    }

    /// Remove an entry and its file
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.critical_section(|index| match index.remove(key) {
            Some(entry) => {
                self.remove_file(&entry.filename);
                Ok((true, true))
            }
            None => Ok((false, false)),
        })
    }

    /// Check if a key is indexed, without touching recency
    pub fn contains(&self, key: &str) -> Result<bool> {
        self.critical_section(|index| Ok((index.contains(key), false)))
    }

    /// Current entries, least recently used first
    pub fn entries(&self) -> Result<Vec<DiskIndexEntry>> {
        self.critical_section(|index| Ok((index.entries().to_vec(), false)))
    }

    /// Shard directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted index
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Path of the shard lock file
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Get capacity
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Total bytes as of this process's last operation
    pub fn size(&self) -> u64 {
        self.view.lock().total_size()
    }

    /// Entry count as of this process's last operation
    pub fn len(&self) -> usize {
        self.view.lock().len()
    }

    /// Check if shard was empty as of this process's last operation
    pub fn is_empty(&self) -> bool {
        self.view.lock().is_empty()
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get utilization percentage
    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity as f64
    }

    /// Run `f` on a freshly loaded index under both locks.
    ///
    /// `f` returns its result and whether it mutated the index; a mutated
    /// (or newly initialized) index is persisted before the locks drop.
    fn critical_section<R>(
        &self,
        f: impl FnOnce(&mut DiskIndex) -> Result<(R, bool)>,
    ) -> Result<R> {
        let mut view = self.view.lock();
        let _lock = FileLock::acquire(self.lock_path(), self.lock_timeout)?;

        let (mut index, recovered) = self.reload()?;
        let (result, changed) = f(&mut index)?;
        if changed || recovered {
            index.save(&self.index_path())?;
        }

        *view = index;
        Ok(result)
    }

    /// Load the index from disk, recovering from a missing or corrupt file.
    ///
    /// The flag is true when the returned index differs from what is on disk.
    fn reload(&self) -> Result<(DiskIndex, bool)> {
        let path = self.index_path();
        match DiskIndex::load(&path) {
            Ok(Some(index)) => Ok((index, false)),
            Ok(None) => Ok((DiskIndex::new(), true)),
            Err(Error::IndexCodec { source, .. }) => {
                warn!(
                    "Index {} is unreadable ({}); rebuilding from directory contents",
                    path.display(),
                    source
                );
                let mut index = DiskIndex::rebuild_from_dir(&self.dir, &[INDEX_FILE, LOCK_FILE])?;
                self.evict_to_fit(&mut index, 0);
                Ok((index, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Evict oldest entries until `incoming` more bytes fit
    fn evict_to_fit(&self, index: &mut DiskIndex, incoming: u64) -> usize {
        let mut evicted = 0;
        while index.total_size() + incoming > self.capacity {
            let Some(entry) = index.pop_oldest() else {
                break;
            };
            self.remove_file(&entry.filename);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            evicted += 1;
            info!(
                "Evicted {} ({} bytes) from shard {}",
                entry.key,
                entry.size,
                self.dir.display()
            );
        }
        evicted
    }

    /// Copy `source` to a hidden temporary file inside the shard directory
    fn stage(&self, source: &Path) -> Result<(NamedTempFile, u64)> {
        let mut src = File::open(source)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempfile_in(&self.dir)?;
        let size = io::copy(&mut src, tmp.as_file_mut())?;
        Ok((tmp, size))
    }

    fn remove_file(&self, filename: &str) {
        let path = self.dir.join(filename);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }

    /// Get shard statistics
    pub fn stats(&self) -> DiskShardStats {
        let (size, entries) = {
            let view = self.view.lock();
            (view.total_size(), view.len())
        };

        DiskShardStats {
            dir: self.dir.clone(),
            size,
            capacity: self.capacity,
            entries,
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            utilization: size as f64 / self.capacity as f64,
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Disk shard statistics
#[derive(Debug, Clone, Serialize)]
pub struct DiskShardStats {
    /// Shard directory
    pub dir: PathBuf,
    /// Current size in bytes
    pub size: u64,
    /// Capacity in bytes
    pub capacity: u64,
    /// Number of entries
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Eviction count
    pub evictions: u64,
    /// Utilization percentage (0.0 - 1.0)
    pub utilization: f64,
}

// =============================================================================
// Tests
// =============================================================================
