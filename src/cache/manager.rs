//! Cache Manager - Unified Three-Tier Cache
//!
//! Serves loaded artifacts from memory, falling back to the disk tier and
//! through it to the remote store. Whatever a lower tier supplies is loaded
//! with the caller's loader and promoted into memory.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::http::{HttpRemoteStore, HttpStoreConfig};
use super::memory::KeyedLru;
use super::metrics::{CacheMetrics, MetricsSnapshot};
use super::remote::RemoteStore;
use super::router::{DiskCacheConfig, ShardRouter};
use super::s3::{S3RemoteStore, S3StoreConfig};
use super::DEFAULT_MEMORY_CAPACITY;
use crate::error::{Error, Result};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process loaded objects (hot)
    Memory,
    /// Local shard directories (warm)
    Disk,
    /// Remote object store (cold)
    Remote,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory (hot)"),
            CacheTier::Disk => write!(f, "disk (warm)"),
            CacheTier::Remote => write!(f, "remote (cold)"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disk tier
    pub disk: DiskCacheConfig,
    /// Maximum number of loaded objects kept in memory
    pub memory_capacity: usize,
    /// Remote tier; `None` makes disk misses final
    pub remote: Option<RemoteConfig>,
}

/// Remote tier backend, selected by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// Amazon S3 or a SigV4-compatible service
    S3(S3StoreConfig),
    /// Plain HTTP object access
    Http(HttpStoreConfig),
}

impl RemoteConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            RemoteConfig::S3(config) => config.validate(),
            RemoteConfig::Http(config) => config.validate(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            disk: DiskCacheConfig::default(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            remote: None,
        }
    }
}

impl CacheConfig {
    /// Read a YAML (or JSON) configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_yaml::from_str(&data)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.disk.validate()?;
        if self.memory_capacity == 0 {
            return Err(Error::Config(
                "memory_capacity must be at least 1".to_string(),
            ));
        }
        if let Some(remote) = &self.remote {
            remote.validate()?;
        }
        Ok(())
    }

    /// Build the configured remote store, if any.
    ///
    /// An S3 remote without credentials is skipped with a warning and the
    /// cache runs without a remote tier.
    pub fn remote_store(&self) -> Result<Option<Arc<dyn RemoteStore>>> {
        let store: Arc<dyn RemoteStore> = match &self.remote {
            None => return Ok(None),
            Some(RemoteConfig::S3(config)) if !config.has_credentials() => {
                warn!(
                    "S3 credentials for bucket {} are not set; remote tier disabled",
                    config.bucket
                );
                return Ok(None);
            }
            Some(RemoteConfig::S3(config)) => Arc::new(S3RemoteStore::new(config.clone())?),
            Some(RemoteConfig::Http(config)) => Arc::new(HttpRemoteStore::new(config.clone())?),
        };
        Ok(Some(store))
    }
}

/// Cache lookup result
#[derive(Debug)]
pub struct CacheHit<T> {
    /// The loaded artifact
    pub value: Arc<T>,
    /// Which tier supplied it
    pub tier: CacheTier,
    /// Lookup latency, including any download and load
    pub latency: Duration,
}

type Loader<T> = Box<dyn Fn(&Path) -> anyhow::Result<T> + Send + Sync>;

/// Unified cache manager over memory, disk and remote tiers
pub struct MultiTierCache<T> {
    /// Loaded artifacts
    memory: KeyedLru<String, Arc<T>>,
    /// Disk tier with optional remote fallback
    disk: ShardRouter,
    /// Turns a cached file into an artifact
    loader: Loader<T>,
    /// Metrics collector, shared with the disk tier
    metrics: Arc<CacheMetrics>,
}

impl<T> MultiTierCache<T> {
    /// Create a cache from configuration
    pub fn new<F>(config: &CacheConfig, loader: F) -> Result<Self>
    where
        F: Fn(&Path) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        config.validate()?;
        let disk = ShardRouter::with_remote(config.disk.clone(), config.remote_store()?)?;
        Self::with_router(disk, config.memory_capacity, loader)
    }

    /// Create a cache over an existing disk tier
    pub fn with_router<F>(disk: ShardRouter, memory_capacity: usize, loader: F) -> Result<Self>
    where
        F: Fn(&Path) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Ok(Self {
            memory: KeyedLru::new(memory_capacity)?,
            metrics: Arc::clone(disk.metrics()),
            disk,
            loader: Box::new(loader),
        })
    }

    /// Get an artifact, or `None` if no tier has it or it fails to load
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        match self.fetch(key) {
            Ok(hit) => hit.map(|hit| hit.value),
            // Already logged where it happened
            Err(Error::Load { .. }) => None,
            Err(e) => {
                error!("Lookup of {} failed: {}", key, e);
                None
            }
        }
    }

    /// Get an artifact and the tier that supplied it.
    ///
    /// `Ok(None)` means no tier has the key; a file that fails to load is
    /// `Err(Error::Load)` and nothing is cached.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self, key: &str) -> Result<Option<CacheHit<T>>> {
        let start = Instant::now();

        if let Some(value) = self.memory.get(key) {
            self.metrics.record_memory_hit();
            debug!("{} served from memory", key);
            return Ok(Some(CacheHit {
                value,
                tier: CacheTier::Memory,
                latency: start.elapsed(),
            }));
        }
        self.metrics.record_memory_miss();

        let Some(located) = self.disk.lookup(key)? else {
            debug!("{} not cached in any tier", key);
            return Ok(None);
        };

        let value = self.load(key, &located.path)?;
        self.promote(key, Arc::clone(&value));

        Ok(Some(CacheHit {
            value,
            tier: located.tier,
            latency: start.elapsed(),
        }))
    }

    /// Store a file in the disk and remote tiers, then load it into memory.
    ///
    /// Fails without touching memory if the remote upload or disk insert
    /// fails.
    #[instrument(skip(self, source), fields(source = %source.display()))]
    pub fn set(&self, key: &str, source: &Path) -> Result<Arc<T>> {
        self.disk.set(key, source)?;

        // Drop any stale artifact loaded from the previous file.
        self.memory.remove(key);

        match self.fetch(key)? {
            Some(hit) => Ok(hit.value),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    /// Drop the loaded artifact; lower tiers are untouched
    pub fn invalidate(&self, key: &str) -> bool {
        self.memory.remove(key).is_some()
    }

    /// Drop the artifact from memory and disk; the remote copy is kept
    pub fn remove(&self, key: &str) -> Result<bool> {
        let in_memory = self.invalidate(key);
        let on_disk = self.disk.remove(key)?;
        Ok(in_memory || on_disk)
    }

    /// Check if a loaded artifact is resident, without touching recency
    pub fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Get memory tier
    pub fn memory(&self) -> &KeyedLru<String, Arc<T>> {
        &self.memory
    }

    /// Get disk tier
    pub fn disk(&self) -> &ShardRouter {
        &self.disk
    }

    /// Get metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn load(&self, key: &str, path: &Path) -> Result<Arc<T>> {
        let start = Instant::now();
        match (self.loader)(path) {
            Ok(value) => {
                self.metrics.record_load_latency(start.elapsed());
                Ok(Arc::new(value))
            }
            Err(e) => {
                self.metrics.record_load_failure();
                error!("Failed to load {} from {}: {:#}", key, path.display(), e);
                Err(Error::Load {
                    key: key.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    fn promote(&self, key: &str, value: Arc<T>) {
        if let Some((evicted, _)) = self.memory.set(key.to_string(), value) {
            self.metrics.record_memory_eviction();
            debug!("Evicted {} from memory", evicted);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::remote::InMemoryRemoteStore;
    use assert_matches::assert_matches;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn read_text(path: &Path) -> anyhow::Result<String> {
        let text = fs::read_to_string(path)?;
        if text == "corrupt" {
            anyhow::bail!("not a model file");
        }
        Ok(text)
    }

    fn make_file(dir: &Path, name: &str, data: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    fn disk_config(dir: &Path) -> DiskCacheConfig {
        DiskCacheConfig::new(dir.join("cache"))
            .with_shards(2)
            .with_capacity(1024 * 1024)
    }

    fn make_cache(dir: &Path, memory_capacity: usize) -> MultiTierCache<String> {
        let router = ShardRouter::new(disk_config(dir)).unwrap();
        MultiTierCache::with_router(router, memory_capacity, read_text).unwrap()
    }

    fn make_cache_with_remote(
        dir: &Path,
        remote: &Arc<InMemoryRemoteStore>,
    ) -> MultiTierCache<String> {
        let remote: Arc<dyn RemoteStore> = remote.clone();
        let router = ShardRouter::with_remote(disk_config(dir), Some(remote)).unwrap();
        MultiTierCache::with_router(router, 4, read_text).unwrap()
    }

    #[test]
    fn test_cache_tier_display() {
        assert_eq!(CacheTier::Memory.to_string(), "memory (hot)");
        assert_eq!(CacheTier::Disk.to_string(), "disk (warm)");
        assert_eq!(CacheTier::Remote.to_string(), "remote (cold)");
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.memory_capacity, 10);
        assert!(config.remote.is_none());

        let zero_memory = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_matches!(zero_memory.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_config_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_file(
            dir.path(),
            "cache.yaml",
            "disk:\n  cache_dir: /var/cache/models\n  num_shards: 4\nmemory_capacity: 3\nremote:\n  kind: http\n  endpoint: http://minio:9000\n  bucket: weights\n",
        );

        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.disk.cache_dir, PathBuf::from("/var/cache/models"));
        assert_eq!(config.disk.num_shards, 4);
        assert_eq!(config.disk.capacity_bytes, 10_000_000_000);
        assert_eq!(config.memory_capacity, 3);

        let remote = assert_matches!(config.remote, Some(RemoteConfig::Http(remote)) => remote);
        assert_eq!(remote.bucket, "weights");
        assert_eq!(remote.max_retries, 3);
    }

    #[test]
    fn test_config_selects_s3_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_file(
            dir.path(),
            "cache.yaml",
            "remote:\n  kind: s3\n  bucket: weights\n  region: ap-southeast-1\n  access_key_id: AKIDEXAMPLE\n  secret_access_key: secret\n",
        );

        let config = CacheConfig::from_file(&path).unwrap();
        let s3 = assert_matches!(&config.remote, Some(RemoteConfig::S3(s3)) => s3);
        assert_eq!(s3.bucket, "weights");
        assert_eq!(s3.region, "ap-southeast-1");
        assert!(config.validate().is_ok());

        let store = config.remote_store().unwrap().unwrap();
        assert_eq!(store.describe(), "s3://weights");
    }

    #[test]
    fn test_s3_remote_without_credentials_is_disabled() {
        let config = CacheConfig {
            remote: Some(RemoteConfig::S3(S3StoreConfig::new("weights", "us-east-1"))),
            ..Default::default()
        };
        assert!(config.remote_store().unwrap().is_none());
    }

    #[test]
    fn test_config_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = make_file(dir.path(), "cache.yaml", "memory_capacity: [unclosed");
        assert_matches!(CacheConfig::from_file(&path), Err(Error::Config(_)));
    }

    #[test]
    fn test_set_then_get_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path(), 2);

        let value = cache
            .set("model", &make_file(dir.path(), "src", "weights"))
            .unwrap();
        assert_eq!(value.as_str(), "weights");
        assert!(cache.contains_in_memory("model"));

        let hit = cache.fetch("model").unwrap().unwrap();
        assert_eq!(hit.tier, CacheTier::Memory);
        assert!(Arc::ptr_eq(&hit.value, &value));
    }

    #[test]
    fn test_disk_hit_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        make_cache(dir.path(), 2)
            .set("model", &make_file(dir.path(), "src", "weights"))
            .unwrap();

        let restarted = make_cache(dir.path(), 2);
        let hit = restarted.fetch("model").unwrap().unwrap();
        assert_eq!(hit.tier, CacheTier::Disk);
        assert_eq!(hit.value.as_str(), "weights");

        let again = restarted.fetch("model").unwrap().unwrap();
        assert_eq!(again.tier, CacheTier::Memory);
    }

    #[test]
    fn test_remote_repopulation() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.insert("model", "weights");
        let cache = make_cache_with_remote(dir.path(), &remote);

        let hit = cache.fetch("model").unwrap().unwrap();
        assert_eq!(hit.tier, CacheTier::Remote);
        assert_eq!(hit.value.as_str(), "weights");

        remote.disconnect();
        cache.invalidate("model");
        let hit = cache.fetch("model").unwrap().unwrap();
        assert_eq!(hit.tier, CacheTier::Disk);

        let metrics = cache.metrics();
        assert_eq!(metrics.remote_hits, 1);
        assert_eq!(metrics.disk_hits, 1);
    }

    #[test]
    fn test_miss_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path(), 2);

        assert!(cache.fetch("missing").unwrap().is_none());
        assert!(cache.get("missing").is_none());
        assert_eq!(cache.metrics().memory_misses, 2);
    }

    #[test]
    fn test_load_failure_caches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path(), 2);

        let result = cache.set("model", &make_file(dir.path(), "src", "corrupt"));
        assert_matches!(result, Err(Error::Load { ref reason, .. }) if reason.contains("not a model file"));
        assert!(!cache.contains_in_memory("model"));

        // The file itself stays on disk
        assert!(cache.disk().get("model").unwrap().is_some());
        assert!(cache.get("model").is_none());
        assert_eq!(cache.metrics().load_failures, 2);
    }

    #[test]
    fn test_failed_upload_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let cache = make_cache_with_remote(dir.path(), &remote);
        cache
            .set("model", &make_file(dir.path(), "v1", "weights-v1"))
            .unwrap();

        remote.disconnect();
        let result = cache.set("model", &make_file(dir.path(), "v2", "weights-v2"));
        assert_matches!(result, Err(Error::Remote { .. }));

        assert_eq!(cache.get("model").unwrap().as_str(), "weights-v1");
    }

    #[test]
    fn test_overwrite_replaces_loaded_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path(), 2);

        cache.set("model", &make_file(dir.path(), "v1", "weights-v1")).unwrap();
        let v2 = cache.set("model", &make_file(dir.path(), "v2", "weights-v2")).unwrap();

        assert_eq!(v2.as_str(), "weights-v2");
        assert_eq!(cache.get("model").unwrap().as_str(), "weights-v2");
    }

    #[test]
    fn test_memory_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path(), 2);

        for key in ["a", "b", "c"] {
            cache.set(key, &make_file(dir.path(), key, key)).unwrap();
        }

        assert_eq!(cache.memory().keys(), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(cache.metrics().memory_evictions, 1);

        // "a" is still on disk
        let hit = cache.fetch("a").unwrap().unwrap();
        assert_eq!(hit.tier, CacheTier::Disk);
    }

    #[test]
    fn test_loader_runs_once_per_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let router = ShardRouter::new(disk_config(dir.path())).unwrap();
        let cache = MultiTierCache::with_router(router, 2, move |path: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            read_text(path)
        })
        .unwrap();

        cache.set("model", &make_file(dir.path(), "src", "weights")).unwrap();
        for _ in 0..5 {
            cache.get("model").unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = make_cache(dir.path(), 2);
        cache.set("model", &make_file(dir.path(), "src", "weights")).unwrap();

        assert!(cache.invalidate("model"));
        assert!(!cache.invalidate("model"));
        assert_eq!(cache.fetch("model").unwrap().unwrap().tier, CacheTier::Disk);

        assert!(cache.remove("model").unwrap());
        assert!(cache.get("model").is_none());
        assert!(!cache.remove("model").unwrap());
    }

    #[test]
    fn test_concurrent_readers_share_value() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new().with_latency(Duration::from_millis(20)));
        remote.insert("model", "weights");
        let cache = Arc::new(make_cache_with_remote(dir.path(), &remote));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get("model").unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().as_str(), "weights");
        }
        assert_eq!(remote.downloads(), 1);
    }
}
