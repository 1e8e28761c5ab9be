//! Remote Tier - Object Store Backends
//!
//! Cold storage used to repopulate the disk tier on a miss and to publish
//! artifacts on write.
//!
//! # Design
//!
//! - Blocking trait: every caller already runs inside a locked critical
//!   section on a worker thread
//! - Backends move whole files; the disk tier owns staging and eviction
//! - Failures carry a reason; callers decide whether they are fatal

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use super::validate_key;
use crate::error::{Error, Result};

/// Remote object store trait
pub trait RemoteStore: Send + Sync {
    /// Upload a local file under `key`
    fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Download `key` into `local_path`, replacing its contents
    fn download(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// In-memory remote store for testing and embedding
///
/// Can simulate per-request latency and a lost connection.
pub struct InMemoryRemoteStore {
    /// Objects by key
    objects: DashMap<String, Bytes>,
    /// Artificial delay applied to every request
    latency: Duration,
    /// Whether requests are currently accepted
    connected: AtomicBool,
    /// Successful uploads
    uploads: AtomicU64,
    /// Successful downloads
    downloads: AtomicU64,
    /// Rejected or failed requests
    failures: AtomicU64,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            objects: DashMap::new(),
            latency: Duration::ZERO,
            connected: AtomicBool::new(true),
            uploads: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl InMemoryRemoteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed an object directly
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.insert(key.into(), data.into());
    }

    /// Read an object directly
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.get(key).map(|data| data.clone())
    }

    /// Check if an object exists
    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// Get number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Reject all requests until `reconnect`
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Accept requests again
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Get successful upload count
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Get successful download count
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    /// Get failed request count
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn begin(&self, operation: &'static str, key: &str) -> Result<()> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Err(Error::Remote {
                operation,
                key: key.to_string(),
                reason: "store disconnected".to_string(),
            })
        }
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        self.begin("upload", key)?;
        let data = fs::read(local_path)?;
        self.objects.insert(key.to_string(), Bytes::from(data));
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        self.begin("download", key)?;
        let data = match self.objects.get(key) {
            Some(data) => data.clone(),
            None => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(Error::RemoteNotFound(key.to_string()));
            }
        };
        fs::write(local_path, &data)?;
        self.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory ({} objects)", self.objects.len())
    }
}

/// Remote store backed by a directory (mounted bucket or shared volume)
pub struct DirectoryRemoteStore {
    root: PathBuf,
}

impl DirectoryRemoteStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl RemoteStore for DirectoryRemoteStore {
    fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let dest = self.object_path(key)?;
        let mut src = File::open(local_path)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&self.root)?;
        let size = io::copy(&mut src, tmp.as_file_mut())?;
        tmp.persist(&dest).map_err(|e| Error::Io(e.error))?;

        debug!("Uploaded {} ({} bytes) to {}", key, size, self.root.display());
        Ok(())
    }

    fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let src = self.object_path(key)?;
        match fs::copy(&src, local_path) {
            Ok(size) => {
                debug!("Downloaded {} ({} bytes) from {}", key, size, self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::RemoteNotFound(key.to_string()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

// =============================================================================
// Tests
// =============================================================================
