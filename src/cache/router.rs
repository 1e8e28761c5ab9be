//! Disk Tier Router
//!
//! Routes keys over N disk shards and falls back to the remote store on a
//! miss.
//!
//! # Design
//!
//! - Shard choice is a pure function of `(key, N)`; see [`shard_index`]
//! - Cold keys are fetched under a per-key lock file in the cache root, so
//!   concurrent readers in any process trigger a single download; waiters
//!   re-check the shard once they hold the lock
//! - Writes publish to the remote store before touching disk; a failed
//!   upload leaves the disk tier unchanged

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use super::disk::{DiskShard, DiskShardStats};
use super::hash::shard_index;
use super::lock::FileLock;
use super::manager::CacheTier;
use super::metrics::CacheMetrics;
use super::remote::RemoteStore;
use super::{
    validate_key, DEFAULT_DISK_CAPACITY, DEFAULT_LOCK_TIMEOUT, DEFAULT_NUM_SHARDS, KEY_LOCK_SUFFIX,
};
use crate::error::{Error, Result};

/// Disk tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskCacheConfig {
    /// Cache root holding one directory per shard
    pub cache_dir: PathBuf,
    /// Number of shards
    pub num_shards: usize,
    /// Total capacity in bytes, split evenly across shards
    pub capacity_bytes: u64,
    /// Bound on lock acquisition in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("modelcache"),
            num_shards: DEFAULT_NUM_SHARDS,
            capacity_bytes: DEFAULT_DISK_CAPACITY,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
        }
    }
}

impl DiskCacheConfig {
    /// Create a configuration rooted at `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Set number of shards
    pub fn with_shards(mut self, num_shards: usize) -> Self {
        self.num_shards = num_shards;
        self
    }

    /// Set total capacity in bytes
    pub fn with_capacity(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Set lock timeout
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Capacity of each shard in bytes
    pub fn shard_capacity(&self) -> u64 {
        if self.num_shards == 0 {
            0
        } else {
            self.capacity_bytes / self.num_shards as u64
        }
    }

    /// Lock timeout
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(Error::Config("num_shards must be at least 1".to_string()));
        }
        if self.shard_capacity() == 0 {
            return Err(Error::Config(format!(
                "capacity of {} bytes leaves nothing for each of {} shards",
                self.capacity_bytes, self.num_shards
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(Error::Config(
                "lock_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A cached file and the tier that supplied it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Path inside the shard directory
    pub path: PathBuf,
    /// `Disk` for a warm hit, `Remote` when the file was just downloaded
    pub tier: CacheTier,
}

/// Sharded disk cache with an optional remote fallback
pub struct ShardRouter {
    config: DiskCacheConfig,
    shards: Vec<DiskShard>,
    remote: Option<Arc<dyn RemoteStore>>,
    metrics: Arc<CacheMetrics>,
}

impl ShardRouter {
    /// Open a disk-only cache
    pub fn new(config: DiskCacheConfig) -> Result<Self> {
        Self::with_remote(config, None)
    }

    /// Open a cache, creating every shard directory and index
    pub fn with_remote(
        config: DiskCacheConfig,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let shard_capacity = config.shard_capacity();
        let shards = (0..config.num_shards)
            .map(|i| {
                DiskShard::open_with_timeout(
                    config.cache_dir.join(i.to_string()),
                    shard_capacity,
                    config.lock_timeout(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Opened disk cache at {} ({} shards x {} bytes, remote: {})",
            config.cache_dir.display(),
            config.num_shards,
            shard_capacity,
            remote
                .as_ref()
                .map(|r| r.describe())
                .unwrap_or_else(|| "none".to_string())
        );

        Ok(Self {
            config,
            shards,
            remote,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    /// Shard index for a key
    pub fn shard_index(&self, key: &str) -> usize {
        shard_index(key, self.shards.len())
    }

    /// Shard responsible for a key
    pub fn shard_for(&self, key: &str) -> &DiskShard {
        &self.shards[self.shard_index(key)]
    }

    /// Get all shards
    pub fn shards(&self) -> &[DiskShard] {
        &self.shards
    }

    /// Get configuration
    pub fn config(&self) -> &DiskCacheConfig {
        &self.config
    }

    /// Get remote store
    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    /// Get metrics collector
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Local path of a cached file, downloading it on a miss
    pub fn get(&self, key: &str) -> Result<Option<PathBuf>> {
        Ok(self.lookup(key)?.map(|located| located.path))
    }

    /// Find a file locally or in the remote store.
    ///
    /// A failed download is logged and reported as absent; the next lookup
    /// asks the remote store again.
    #[instrument(skip(self), level = "debug")]
    pub fn lookup(&self, key: &str) -> Result<Option<Located>> {
        validate_key(key)?;
        let shard = self.shard_for(key);

        let start = Instant::now();
        if let Some(path) = shard.get(key)? {
            self.metrics.record_disk_hit();
            self.metrics.record_disk_read_latency(start.elapsed());
            return Ok(Some(Located {
                path,
                tier: CacheTier::Disk,
            }));
        }

        let Some(remote) = &self.remote else {
            self.metrics.record_disk_miss();
            return Ok(None);
        };

        let _key_lock = FileLock::acquire(self.key_lock_path(key), self.config.lock_timeout())?;

        // Another reader may have fetched it while we waited for the lock.
        if let Some(path) = shard.get(key)? {
            self.metrics.record_disk_hit();
            return Ok(Some(Located {
                path,
                tier: CacheTier::Disk,
            }));
        }
        self.metrics.record_disk_miss();

        let scratch = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.config.cache_dir)?;

        let start = Instant::now();
        match remote.download(key, scratch.path()) {
            Ok(()) => {
                self.metrics.record_remote_hit();
                self.metrics
                    .record_remote_download_latency(start.elapsed());
                info!(
                    "Downloaded {} from {} in {:?}",
                    key,
                    remote.describe(),
                    start.elapsed()
                );
            }
            Err(Error::RemoteNotFound(_)) => {
                self.metrics.record_remote_miss();
                debug!("{} not found in {}", key, remote.describe());
                return Ok(None);
            }
            Err(e) => {
                self.metrics.record_remote_miss();
                error!("Download of {} from {} failed: {}", key, remote.describe(), e);
                return Ok(None);
            }
        }

        let evicted = shard.set(key, scratch.path())?;
        self.metrics.record_disk_evictions(evicted);

        Ok(shard.get(key)?.map(|path| Located {
            path,
            tier: CacheTier::Remote,
        }))
    }

    /// Store a file, publishing it to the remote store first.
    ///
    /// An upload failure fails the whole operation and leaves the disk tier
    /// untouched.
    #[instrument(skip(self, source), fields(source = %source.display()))]
    pub fn set(&self, key: &str, source: &Path) -> Result<()> {
        validate_key(key)?;
        let shard = self.shard_for(key);

        let _key_lock = match &self.remote {
            Some(remote) => {
                let lock =
                    FileLock::acquire(self.key_lock_path(key), self.config.lock_timeout())?;

                let start = Instant::now();
                if let Err(e) = remote.upload(source, key) {
                    self.metrics.record_upload_failure();
                    error!("Upload of {} to {} failed: {}", key, remote.describe(), e);
                    return Err(e);
                }
                self.metrics.record_upload();
                self.metrics.record_remote_upload_latency(start.elapsed());
                info!("Uploaded {} to {}", key, remote.describe());

                Some(lock)
            }
            None => None,
        };

        let evicted = shard.set(key, source)?;
        self.metrics.record_disk_evictions(evicted);
        Ok(())
    }

    /// Remove a file from the disk tier; the remote copy is kept
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.shard_for(key).remove(key)
    }

    /// Statistics for every shard, in shard order
    pub fn stats(&self) -> Vec<DiskShardStats> {
        self.shards.iter().map(DiskShard::stats).collect()
    }

    /// Total bytes across shards as of this process's last operations
    pub fn size(&self) -> u64 {
        self.shards.iter().map(DiskShard::size).sum()
    }

    fn key_lock_path(&self, key: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}{}", key, KEY_LOCK_SUFFIX))
    }
}

// =============================================================================
// Tests
// =============================================================================
