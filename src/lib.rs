//! modelcache - Multi-Tier Model Artifact Cache
//!
//! Keeps model artifacts close to the process that serves them: loaded
//! handles in memory, model files in a sharded on-disk LRU shared by every
//! process on the host, and an optional remote object store that
//! repopulates the disk tier on a miss.
//!
//! # Architecture
//!
//! ```text
//! get(key) ─▶ KeyedLru ──miss──▶ ShardRouter ──miss──▶ RemoteStore
//!                ▲                    │  (per-key lock,      │
//!                │                    │   single download)   │
//!                └──── load(path) ◀───┴──────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Memory, disk and remote tiers and their orchestration
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheHit, CacheTier, DiskCacheConfig, DiskShard, HttpRemoteStore,
    HttpStoreConfig, KeyedLru, MultiTierCache, NamedModelCache, RemoteConfig, RemoteStore,
    S3RemoteStore, S3StoreConfig, ShardRouter,
};
pub use error::{Error, Result};
