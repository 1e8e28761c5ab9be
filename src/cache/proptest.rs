//! Property-Based Tests for the Cache Tiers
//!
//! # Test Properties
//!
//! 1. **LRU Bound**: the memory tier holds exactly the C most recently
//!    touched keys, in recency order
//! 2. **Byte Bound**: a shard's recorded total equals the sum of its entries
//!    and never exceeds capacity, whatever the operation sequence
//! 3. **Idempotent Overwrite**: storing the same file twice leaves the total
//!    unchanged
//! 4. **Routing**: shard choice is in range and a pure function of the key

#![cfg(test)]

use std::collections::VecDeque;
use std::fs;

use proptest::prelude::*;

use super::disk::DiskShard;
use super::hash::shard_index;
use super::index::DiskIndex;
use super::memory::KeyedLru;
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum MemoryOp {
    Get(u8),
    Set(u8),
}

#[derive(Debug, Clone)]
enum DiskOp {
    Get(u8),
    Set(u8, usize),
    Remove(u8),
}

/// Strategy for memory tier operations over a small key space
fn memory_ops_strategy() -> impl Strategy<Value = Vec<MemoryOp>> {
    let op = prop_oneof![
        (0u8..8).prop_map(MemoryOp::Get),
        (0u8..8).prop_map(MemoryOp::Set),
    ];
    prop::collection::vec(op, 1..200)
}

/// Strategy for shard operations; some sizes exceed the shard on purpose
fn disk_ops_strategy() -> impl Strategy<Value = Vec<DiskOp>> {
    let op = prop_oneof![
        2 => (0u8..6).prop_map(DiskOp::Get),
        4 => ((0u8..6), 1usize..=300).prop_map(|(k, size)| DiskOp::Set(k, size)),
        1 => (0u8..6).prop_map(DiskOp::Remove),
    ];
    prop::collection::vec(op, 1..40)
}

const SHARD_CAPACITY: u64 = 256;

fn check_shard(shard: &DiskShard) -> Result<(), TestCaseError> {
    let index = DiskIndex::load(&shard.index_path())?
        .ok_or_else(|| TestCaseError::fail("index file missing"))?;

    let sum: u64 = index.entries().iter().map(|e| e.size).sum();
    prop_assert_eq!(sum, index.total_size());
    prop_assert!(index.total_size() <= SHARD_CAPACITY);

    for entry in index.entries() {
        let len = fs::metadata(shard.dir().join(&entry.filename))?.len();
        prop_assert_eq!(len, entry.size);
    }
    Ok(())
}

// =============================================================================
// Memory Tier Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: resident keys are the most recently touched ones, in order.
    #[test]
    fn prop_lru_matches_reference_model(
        capacity in 1usize..6,
        ops in memory_ops_strategy(),
    ) {
        let cache = KeyedLru::new(capacity)?;
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                MemoryOp::Get(k) => {
                    let hit = cache.get(&k).is_some();
                    prop_assert_eq!(hit, model.contains(&k));
                    if let Some(pos) = model.iter().position(|&m| m == k) {
                        model.remove(pos);
                        model.push_back(k);
                    }
                }
                MemoryOp::Set(k) => {
                    let evicted = cache.set(k, u32::from(k));
                    if let Some(pos) = model.iter().position(|&m| m == k) {
                        model.remove(pos);
                        prop_assert!(evicted.is_none());
                    } else if model.len() == capacity {
                        let oldest = model.pop_front();
                        prop_assert_eq!(evicted.map(|(key, _)| key), oldest);
                    } else {
                        prop_assert!(evicted.is_none());
                    }
                    model.push_back(k);
                }
            }

            prop_assert!(cache.len() <= capacity);
            prop_assert_eq!(cache.keys(), model.iter().copied().collect::<Vec<_>>());
        }
    }
}

// =============================================================================
// Disk Tier Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: the byte bound and index consistency hold after every operation.
    #[test]
    fn prop_shard_byte_bound(ops in disk_ops_strategy()) {
        let cache_dir = tempfile::tempdir()?;
        let src_dir = tempfile::tempdir()?;
        let shard = DiskShard::open(cache_dir.path().join("0"), SHARD_CAPACITY)?;

        for op in ops {
            match op {
                DiskOp::Get(k) => {
                    shard.get(&format!("k{}", k))?;
                }
                DiskOp::Set(k, size) => {
                    let src = src_dir.path().join("src");
                    fs::write(&src, vec![k; size])?;
                    let before = shard.entries()?;

                    match shard.set(&format!("k{}", k), &src) {
                        Ok(_) => prop_assert!(size as u64 <= SHARD_CAPACITY),
                        Err(Error::CapacityOverflow { .. }) => {
                            prop_assert!(size as u64 > SHARD_CAPACITY);
                            prop_assert_eq!(shard.entries()?, before);
                        }
                        Err(e) => return Err(TestCaseError::fail(e.to_string())),
                    }
                }
                DiskOp::Remove(k) => {
                    shard.remove(&format!("k{}", k))?;
                }
            }

            check_shard(&shard)?;
        }
    }

    /// Property: storing the same file again leaves the total unchanged.
    #[test]
    fn prop_overwrite_is_idempotent(sizes in prop::collection::vec(1usize..=64, 1..4)) {
        let cache_dir = tempfile::tempdir()?;
        let src_dir = tempfile::tempdir()?;
        let shard = DiskShard::open(cache_dir.path().join("0"), SHARD_CAPACITY)?;

        for (i, size) in sizes.iter().enumerate() {
            let src = src_dir.path().join(format!("src{}", i));
            fs::write(&src, vec![0u8; *size])?;
            shard.set(&format!("k{}", i), &src)?;
        }

        let total = shard.size();
        let src = src_dir.path().join("src0");
        shard.set("k0", &src)?;
        shard.set("k0", &src)?;

        prop_assert_eq!(shard.size(), total);
        check_shard(&shard)?;
    }
}

// =============================================================================
// Routing Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Property: shard choice is in range and deterministic.
    #[test]
    fn prop_shard_index_in_range(key in ".{0,64}", num_shards in 1usize..64) {
        let shard = shard_index(&key, num_shards);
        prop_assert!(shard < num_shards);
        prop_assert_eq!(shard, shard_index(&key, num_shards));
    }
}
