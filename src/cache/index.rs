//! Disk Index
//!
//! Persisted, recency-ordered mapping from cache key to stored file for one
//! disk shard.
//!
//! The index is the shard's only durable state. It is rewritten as a whole
//! on every mutation and read back fresh inside every locked critical
//! section, so an in-memory copy is never trusted across the lock boundary.
//!
//! # Format
//!
//! ```text
//! {
//!   "total_size": 24,
//!   "entries": [                      // least recently used first
//!     {"key": "file_1", "filename": "file_1", "size": 8,  "last_access": "..."},
//!     {"key": "file_2", "filename": "file_2", "size": 16, "last_access": "..."}
//!   ]
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// One cached file in a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIndexEntry {
    /// Cache key
    pub key: String,
    /// File name inside the shard directory
    pub filename: String,
    /// File size in bytes
    pub size: u64,
    /// Last time the entry was inserted or read
    #[serde(default = "Utc::now")]
    pub last_access: DateTime<Utc>,
}

impl DiskIndexEntry {
    /// Create an entry stored under its own key
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        Self {
            filename: key.clone(),
            key,
            size,
            last_access: Utc::now(),
        }
    }
}

/// Recency-ordered index of a shard's files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIndex {
    /// Sum of all entry sizes
    total_size: u64,
    /// Entries, least recently used first
    entries: Vec<DiskIndexEntry>,
}

impl DiskIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Read an index file; `Ok(None)` if it does not exist.
    ///
    /// A stored total that disagrees with the entries is recomputed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut index: DiskIndex =
            serde_json::from_slice(&data).map_err(|source| Error::IndexCodec {
                path: path.to_path_buf(),
                source,
            })?;

        let actual: u64 = index.entries.iter().map(|e| e.size).sum();
        if actual != index.total_size {
            warn!(
                "Index {} recorded {} bytes but entries sum to {}; using entry sum",
                path.display(),
                index.total_size,
                actual
            );
            index.total_size = actual;
        }

        Ok(Some(index))
    }

    /// Write the whole index, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self).map_err(|source| Error::IndexCodec {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = tmp_path(path);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Rebuild an index from the files present in a shard directory.
    ///
    /// Hidden files and `reserved` names are skipped; entries are ordered by
    /// modification time, oldest first.
    pub fn rebuild_from_dir(dir: &Path, reserved: &[&str]) -> Result<Self> {
        let mut found: Vec<(SystemTime, DiskIndexEntry)> = Vec::new();

        for dirent in fs::read_dir(dir)? {
            let dirent = dirent?;
            let meta = dirent.metadata()?;
            if !meta.is_file() {
                continue;
            }

            let Some(name) = dirent.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || reserved.contains(&name.as_str()) {
                continue;
            }

            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let mut entry = DiskIndexEntry::new(name, meta.len());
            entry.last_access = DateTime::<Utc>::from(modified);
            found.push((modified, entry));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.key.cmp(&b.1.key)));

        let mut index = Self::new();
        for (_, entry) in found {
            index.push(entry);
        }
        Ok(index)
    }

    /// Look up an entry without touching recency
    pub fn get(&self, key: &str) -> Option<&DiskIndexEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Check if a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Mark an entry most recently used
    pub fn touch(&mut self, key: &str) -> Option<&DiskIndexEntry> {
        let pos = self.position(key)?;
        let mut entry = self.entries.remove(pos);
        entry.last_access = Utc::now();
        self.entries.push(entry);
        self.entries.last()
    }

    /// Append an entry as most recently used, replacing any entry with the
    /// same key
    pub fn push(&mut self, entry: DiskIndexEntry) {
        self.remove(&entry.key);
        self.total_size += entry.size;
        self.entries.push(entry);
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<DiskIndexEntry> {
        let pos = self.position(key)?;
        let entry = self.entries.remove(pos);
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Remove and return the least recently used entry
    pub fn pop_oldest(&mut self) -> Option<DiskIndexEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = self.entries.remove(0);
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Sum of entry sizes in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, least recently used first
    pub fn entries(&self) -> &[DiskIndexEntry] {
        &self.entries
    }

    /// Keys, least recently used first
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

// =============================================================================
// Tests
// =============================================================================
