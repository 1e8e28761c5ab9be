//! Cache Metrics Collection
//!
//! Per-tier counters and latencies for monitoring cache health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Cache metrics collector, shared by the router and the cache manager
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Memory tier
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    memory_evictions: AtomicU64,
    load_failures: AtomicU64,

    // Disk tier
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    disk_evictions: AtomicU64,

    // Remote tier
    remote_hits: AtomicU64,
    remote_misses: AtomicU64,
    uploads: AtomicU64,
    upload_failures: AtomicU64,

    // Operation latencies (microseconds, using exponential moving average)
    load_latency_us: AtomicU64,
    disk_read_latency_us: AtomicU64,
    remote_download_latency_us: AtomicU64,
    remote_upload_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Memory tier
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_eviction(&self) {
        self.memory_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    pub fn memory_misses(&self) -> u64 {
        self.memory_misses.load(Ordering::Relaxed)
    }

    pub fn memory_hit_ratio(&self) -> f64 {
        ratio(self.memory_hits(), self.memory_misses())
    }

    // Disk tier
    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_evictions(&self, count: usize) {
        self.disk_evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    pub fn disk_misses(&self) -> u64 {
        self.disk_misses.load(Ordering::Relaxed)
    }

    pub fn disk_hit_ratio(&self) -> f64 {
        ratio(self.disk_hits(), self.disk_misses())
    }

    // Remote tier
    pub fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_miss(&self) {
        self.remote_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_failure(&self) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_hits(&self) -> u64 {
        self.remote_hits.load(Ordering::Relaxed)
    }

    pub fn remote_misses(&self) -> u64 {
        self.remote_misses.load(Ordering::Relaxed)
    }

    // Latency tracking
    pub fn record_load_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.load_latency_us, duration);
    }

    pub fn record_disk_read_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.disk_read_latency_us, duration);
    }

    pub fn record_remote_download_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.remote_download_latency_us, duration);
    }

    pub fn record_remote_upload_latency(&self, duration: Duration) {
        self.update_latency_ema(&self.remote_upload_latency_us, duration);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn load_latency(&self) -> Duration {
        Duration::from_micros(self.load_latency_us.load(Ordering::Relaxed))
    }

    pub fn disk_read_latency(&self) -> Duration {
        Duration::from_micros(self.disk_read_latency_us.load(Ordering::Relaxed))
    }

    pub fn remote_download_latency(&self) -> Duration {
        Duration::from_micros(self.remote_download_latency_us.load(Ordering::Relaxed))
    }

    pub fn remote_upload_latency(&self) -> Duration {
        Duration::from_micros(self.remote_upload_latency_us.load(Ordering::Relaxed))
    }

    /// Fraction of lookups served by any tier.
    ///
    /// A lookup is a final miss when the disk missed and the remote tier did
    /// not supply it either.
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits = self.memory_hits() + self.disk_hits() + self.remote_hits();
        let final_misses = self.disk_misses().saturating_sub(self.remote_hits());
        ratio(hits, final_misses)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            memory_hits: self.memory_hits(),
            memory_misses: self.memory_misses(),
            memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
            memory_hit_ratio: self.memory_hit_ratio(),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            load_latency_us: self.load_latency().as_micros() as u64,

            disk_hits: self.disk_hits(),
            disk_misses: self.disk_misses(),
            disk_evictions: self.disk_evictions.load(Ordering::Relaxed),
            disk_hit_ratio: self.disk_hit_ratio(),
            disk_read_latency_us: self.disk_read_latency().as_micros() as u64,

            remote_hits: self.remote_hits(),
            remote_misses: self.remote_misses(),
            uploads: self.uploads.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            remote_download_latency_us: self.remote_download_latency().as_micros() as u64,
            remote_upload_latency_us: self.remote_upload_latency().as_micros() as u64,

            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }

    /// Reset all counters and latency averages
    pub fn reset(&self) {
        for counter in [
            &self.memory_hits,
            &self.memory_misses,
            &self.memory_evictions,
            &self.load_failures,
            &self.disk_hits,
            &self.disk_misses,
            &self.disk_evictions,
            &self.remote_hits,
            &self.remote_misses,
            &self.uploads,
            &self.upload_failures,
            &self.load_latency_us,
            &self.disk_read_latency_us,
            &self.remote_download_latency_us,
            &self.remote_upload_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    // Memory
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_evictions: u64,
    pub memory_hit_ratio: f64,
    pub load_failures: u64,
    pub load_latency_us: u64,

    // Disk
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub disk_evictions: u64,
    pub disk_hit_ratio: f64,
    pub disk_read_latency_us: u64,

    // Remote
    pub remote_hits: u64,
    pub remote_misses: u64,
    pub uploads: u64,
    pub upload_failures: u64,
    pub remote_download_latency_us: u64,
    pub remote_upload_latency_us: u64,

    // Overall
    pub overall_hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
