//! Memory Tier - Keyed LRU
//!
//! Bounded in-process LRU map holding loaded artifacts (model handles).
//!
//! # Design
//!
//! - Capacity is an object count, not bytes: loaded handles have no useful
//!   byte size from the cache's point of view
//! - Every call is one critical section on a single mutex; no I/O happens
//!   while it is held
//! - `set` hands the evicted entry back so the caller decides when its
//!   resources are released

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Thread-safe LRU map bounded by entry count
pub struct KeyedLru<K: Hash + Eq, V> {
    /// Entries in recency order
    entries: Mutex<LruCache<K, V>>,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl<K: Hash + Eq, V> KeyedLru<K, V> {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            Error::Config("memory cache capacity must be at least 1".to_string())
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Get a value, marking it most recently used
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        let value = self.entries.lock().get(key).cloned();

        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };

        value
    }

    /// Insert or overwrite a value, marking it most recently used.
    ///
    /// Returns the least recently used entry if the insert pushed the cache
    /// over capacity. An overwritten value is dropped, not returned.
    pub fn set(&self, key: K, value: V) -> Option<(K, V)> {
        let mut entries = self.entries.lock();

        if entries.contains(&key) {
            entries.put(key, value);
            return None;
        }

        let evicted = entries.push(key, value);
        drop(entries);

        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Remove an entry
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().pop(key)
    }

    /// Check if a key is resident without touching its recency
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().contains(key)
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries
            .lock()
            .iter()
            .rev()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
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

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> LruStats {
        LruStats {
            entries: self.len(),
            capacity: self.capacity(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
        }
    }
}

/// Memory tier statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LruStats {
    /// Number of entries
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
}

// =============================================================================
// Tests
// =============================================================================
