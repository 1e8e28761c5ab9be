//! Three-Tiered Model Artifact Cache
//!
//! Caches loaded model handles in memory, model files on local disk, and
//! optionally repopulates the disk tier from a remote object store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         MultiTierCache                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Memory (hot)         │ Disk (warm)          │ Remote (cold)             │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌────────────────────┐    │
//! │  │ KeyedLru       │   │ │ ShardRouter    │   │ │ RemoteStore        │    │
//! │  │ (object count) │   │ │ N x DiskShard  │   │ │ (S3, HTTP,         │    │
//! │  │ loaded handles │   │ │ (bytes, index, │   │ │  directory, memory)│    │
//! │  └────────────────┘   │ │  lock file)    │   │ └────────────────────┘    │
//! │         │             │ └────────────────┘   │           │               │
//! │         └─────────────┴─────────┴────────────┴───────────┘               │
//! │                              │                                           │
//! │                   Cache-aside read, upload-first write                   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Filesystem Layout
//!
//! ```text
//! cache_dir/
//! ├── 0/            shard 0: cached files + `index` + `lock`
//! ├── 1/
//! ├── ...
//! └── <key>.lock    per-key remote download lock
//! ```
//!
//! # Concurrency
//!
//! - Each shard is serialized in-process by a mutex and across processes by
//!   an exclusive lock file; the index is reloaded after every acquisition
//! - Different shards never contend with each other
//! - Cold keys are downloaded once; concurrent readers wait on the per-key
//!   lock and then find the key on disk

mod disk;
mod hash;
mod http;
mod index;
mod lock;
mod manager;
mod memory;
mod metrics;
mod named;
mod remote;
mod router;
mod s3;

#[cfg(test)]
mod proptest;

pub use disk::{DiskShard, DiskShardStats};
pub use hash::{murmur3_x64_128, shard_index};
pub use http::{HttpRemoteStore, HttpStoreConfig};
pub use index::{DiskIndex, DiskIndexEntry};
pub use lock::FileLock;
pub use manager::{CacheConfig, CacheHit, CacheTier, MultiTierCache, RemoteConfig};
pub use memory::{KeyedLru, LruStats};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use named::NamedModelCache;
pub use remote::{DirectoryRemoteStore, InMemoryRemoteStore, RemoteStore};
pub use router::{DiskCacheConfig, Located, ShardRouter};
pub use s3::{S3RemoteStore, S3StoreConfig, DEFAULT_MULTIPART_THRESHOLD};

use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of disk shards
pub const DEFAULT_NUM_SHARDS: usize = 10;

/// Default total disk capacity across all shards (10GB)
pub const DEFAULT_DISK_CAPACITY: u64 = 10 * 1000 * 1000 * 1000;

/// Default number of loaded objects kept in memory
pub const DEFAULT_MEMORY_CAPACITY: usize = 10;

/// Default bound on advisory lock acquisition
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Name of the persisted index file inside a shard directory
pub const INDEX_FILE: &str = "index";

/// Name of the shard lock file inside a shard directory
pub const LOCK_FILE: &str = "lock";

/// Suffix of per-key download lock files in the cache root
pub const KEY_LOCK_SUFFIX: &str = ".lock";

/// Check that a key can be used verbatim as a filename inside a shard.
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.starts_with('.') {
        Some("key must not start with '.'")
    } else if key.contains(['/', '\\', '\0']) {
        Some("key must be a single path component")
    } else if key == INDEX_FILE || key == LOCK_FILE {
        Some("key collides with a reserved shard file")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

// =============================================================================
// Tests
// =============================================================================
