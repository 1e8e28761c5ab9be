//! modelcache Integration Tests
//!
//! Exercises the public API end to end:
//! - Feature 1: Disk tier capacity and persistence
//! - Feature 2: Remote tier repopulation
//! - Feature 3: Multi-tier orchestration
//! - Feature 4: Named model cache
//! - Feature 5: Concurrency across cache handles

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use modelcache::cache::{
    DirectoryRemoteStore, DiskCacheConfig, DiskShard, InMemoryRemoteStore, RemoteStore,
    ShardRouter,
};
use modelcache::{CacheTier, Error, MultiTierCache, NamedModelCache};

fn make_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    Ok(fs::read_to_string(path)?)
}

// =============================================================================
// Feature 1: Disk Tier
// =============================================================================

mod disk_tier_tests {
    use super::*;

    #[test]
    fn test_single_shard_capacity_walkthrough() {
        let work = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig::new(work.path().join("cache"))
            .with_shards(1)
            .with_capacity(32);
        let router = ShardRouter::new(config).unwrap();

        let file_1 = make_file(work.path(), "f1", &[1u8; 8]);
        router.set("file_1", &file_1).unwrap();
        assert_eq!(router.size(), 8);

        router.set("file_1", &file_1).unwrap();
        assert_eq!(router.size(), 8);

        router
            .set("file_2", &make_file(work.path(), "f2", &[2u8; 16]))
            .unwrap();
        assert_eq!(router.size(), 24);

        router
            .set("file_3", &make_file(work.path(), "f3", &[3u8; 30]))
            .unwrap();
        assert_eq!(router.size(), 30);

        assert!(router.get("file_1").unwrap().is_none());
        assert!(router.get("file_2").unwrap().is_none());
        assert!(router.get("file_3").unwrap().is_some());
    }

    #[test]
    fn test_cache_survives_restart() {
        let work = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig::new(work.path().join("cache")).with_shards(3);

        {
            let router = ShardRouter::new(config.clone()).unwrap();
            for i in 0..10 {
                let key = format!("model-{}", i);
                router
                    .set(&key, &make_file(work.path(), &key, key.as_bytes()))
                    .unwrap();
            }
        }

        let router = ShardRouter::new(config).unwrap();
        for i in 0..10 {
            let key = format!("model-{}", i);
            let path = router.get(&key).unwrap().unwrap();
            assert_eq!(fs::read(path).unwrap(), key.as_bytes());
        }
    }

    #[test]
    fn test_index_is_json_on_disk() {
        let work = tempfile::tempdir().unwrap();
        let shard = DiskShard::open(work.path().join("0"), 1024).unwrap();
        shard
            .set("model", &make_file(work.path(), "src", b"weights"))
            .unwrap();

        let raw = fs::read_to_string(shard.index_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["total_size"], 7);
        assert_eq!(json["entries"][0]["key"], "model");
        assert_eq!(json["entries"][0]["filename"], "model");
        assert_eq!(json["entries"][0]["size"], 7);
    }

    #[test]
    fn test_oversized_file_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig::new(work.path().join("cache"))
            .with_shards(2)
            .with_capacity(64);
        let router = ShardRouter::new(config).unwrap();

        let result = router.set("huge", &make_file(work.path(), "huge", &[0u8; 33]));
        assert_matches!(
            result,
            Err(Error::CapacityOverflow { size: 33, capacity: 32, .. })
        );
    }
}

// =============================================================================
// Feature 2: Remote Tier
// =============================================================================

mod remote_tier_tests {
    use super::*;

    #[test]
    fn test_directory_store_repopulates_disk() {
        let work = tempfile::tempdir().unwrap();
        let bucket = DirectoryRemoteStore::new(work.path().join("bucket")).unwrap();
        bucket
            .upload(&make_file(work.path(), "src", b"weights"), "bert.bin")
            .unwrap();

        let remote: Arc<dyn RemoteStore> = Arc::new(bucket);
        let router =
            ShardRouter::with_remote(DiskCacheConfig::new(work.path().join("cache")), Some(remote))
                .unwrap();

        let cold = router.lookup("bert.bin").unwrap().unwrap();
        assert_eq!(cold.tier, CacheTier::Remote);
        assert_eq!(fs::read(&cold.path).unwrap(), b"weights");

        // Gone from the bucket, still served from disk
        fs::remove_file(work.path().join("bucket").join("bert.bin")).unwrap();
        let warm = router.lookup("bert.bin").unwrap().unwrap();
        assert_eq!(warm.tier, CacheTier::Disk);
    }

    #[test]
    fn test_writes_reach_a_second_host() {
        // Two caches with separate disks share one bucket.
        let work = tempfile::tempdir().unwrap();
        let bucket: Arc<dyn RemoteStore> =
            Arc::new(DirectoryRemoteStore::new(work.path().join("bucket")).unwrap());

        let host_a = ShardRouter::with_remote(
            DiskCacheConfig::new(work.path().join("host-a")),
            Some(Arc::clone(&bucket)),
        )
        .unwrap();
        let host_b = ShardRouter::with_remote(
            DiskCacheConfig::new(work.path().join("host-b")),
            Some(bucket),
        )
        .unwrap();

        host_a
            .set("model", &make_file(work.path(), "src", b"weights"))
            .unwrap();

        let located = host_b.lookup("model").unwrap().unwrap();
        assert_eq!(located.tier, CacheTier::Remote);
        assert_eq!(fs::read(located.path).unwrap(), b"weights");
    }

    #[test]
    fn test_without_remote_misses_are_final() {
        let work = tempfile::tempdir().unwrap();
        let router = ShardRouter::new(DiskCacheConfig::new(work.path().join("cache"))).unwrap();
        assert!(router.lookup("model").unwrap().is_none());
    }
}

// =============================================================================
// Feature 3: Multi-Tier Orchestration
// =============================================================================

mod multi_tier_tests {
    use super::*;

    fn make_cache(work: &Path, remote: &Arc<InMemoryRemoteStore>) -> MultiTierCache<String> {
        let remote: Arc<dyn RemoteStore> = remote.clone();
        let config = DiskCacheConfig::new(work.join("cache"))
            .with_shards(4)
            .with_capacity(1024 * 1024);
        let router = ShardRouter::with_remote(config, Some(remote)).unwrap();
        MultiTierCache::with_router(router, 2, read_text).unwrap()
    }

    #[test]
    fn test_lookup_walks_down_the_tiers() {
        let work = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.insert("model", "weights");
        let cache = make_cache(work.path(), &remote);

        assert_eq!(cache.fetch("model").unwrap().unwrap().tier, CacheTier::Remote);
        assert_eq!(cache.fetch("model").unwrap().unwrap().tier, CacheTier::Memory);

        cache.invalidate("model");
        assert_eq!(cache.fetch("model").unwrap().unwrap().tier, CacheTier::Disk);

        assert!(cache.fetch("missing").unwrap().is_none());
    }

    #[test]
    fn test_set_publishes_and_warms_memory() {
        let work = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let cache = make_cache(work.path(), &remote);

        let value = cache
            .set("model", &make_file(work.path(), "src", b"weights"))
            .unwrap();
        assert_eq!(value.as_str(), "weights");
        assert!(remote.contains("model"));
        assert!(cache.contains_in_memory("model"));
    }

    #[test]
    fn test_metrics_snapshot_serializes() {
        let work = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.insert("model", "weights");
        let cache = make_cache(work.path(), &remote);

        cache.get("model").unwrap();
        cache.get("model").unwrap();

        let snapshot = cache.metrics();
        assert_eq!(snapshot.memory_hits, 1);
        assert_eq!(snapshot.remote_hits, 1);
        assert_eq!(snapshot.disk_misses, 1);
        assert_eq!(snapshot.overall_hit_ratio, 1.0);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["memory_hits"], 1);
    }

    #[test]
    fn test_evicted_objects_are_released() {
        let work = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let cache = make_cache(work.path(), &remote);

        let first = cache
            .set("a", &make_file(work.path(), "a", b"a"))
            .unwrap();
        assert_eq!(Arc::strong_count(&first), 2);

        cache.set("b", &make_file(work.path(), "b", b"b")).unwrap();
        cache.set("c", &make_file(work.path(), "c", b"c")).unwrap();

        // Only our handle is left once memory evicts "a"
        assert_eq!(Arc::strong_count(&first), 1);
    }
}

// =============================================================================
// Feature 4: Named Model Cache
// =============================================================================

mod named_cache_tests {
    use super::*;

    #[test]
    fn test_capacity_two_keeps_latest() {
        let folder = tempfile::tempdir().unwrap();
        for key in ["a", "b", "c"] {
            make_file(folder.path(), key, key.as_bytes());
        }

        let cache = NamedModelCache::new(folder.path(), 2, read_text).unwrap();
        for key in ["a", "b", "c"] {
            assert_eq!(cache.get(key).unwrap().as_str(), key);
        }

        assert_eq!(
            cache.cache().keys(),
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn test_models_json_lookup() {
        let folder = tempfile::tempdir().unwrap();
        make_file(folder.path(), "model_a_file.pth", b"model a");
        make_file(
            folder.path(),
            "models.json",
            br#"{"model_a": "model_a_file.pth"}"#,
        );

        let cache = NamedModelCache::new(folder.path(), 1, read_text).unwrap();
        assert_eq!(cache.get("model_a").unwrap().as_str(), "model a");
    }
}

// =============================================================================
// Feature 5: Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_single_download_across_handles() {
        let work = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new().with_latency(Duration::from_millis(100)));
        remote.insert("model", "weights");
        let config = DiskCacheConfig::new(work.path().join("cache")).with_shards(2);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let config = config.clone();
                let remote: Arc<dyn RemoteStore> = remote.clone();
                thread::spawn(move || {
                    let router = ShardRouter::with_remote(config, Some(remote)).unwrap();
                    router.get("model").unwrap().unwrap()
                })
            })
            .collect();

        let paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(remote.downloads(), 1);
    }

    #[test]
    fn test_parallel_writers_respect_capacity() {
        let work = tempfile::tempdir().unwrap();
        let config = DiskCacheConfig::new(work.path().join("cache"))
            .with_shards(2)
            .with_capacity(2 * 500);
        let src = Arc::new(tempfile::tempdir().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let config = config.clone();
                let src = Arc::clone(&src);
                thread::spawn(move || {
                    let router = ShardRouter::new(config).unwrap();
                    for i in 0..20 {
                        let key = format!("t{}-{}", t, i);
                        let file = make_file(src.path(), &key, &vec![0u8; 10 + i * 3]);
                        router.set(&key, &file).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let router = ShardRouter::new(config).unwrap();
        for shard in router.shards() {
            let entries = shard.entries().unwrap();
            let total: u64 = entries.iter().map(|e| e.size).sum();
            assert!(total <= shard.capacity());
            assert_eq!(total, shard.size());
        }
    }
}
