//! Shard Routing Hash
//!
//! Deterministic key → shard assignment over a 128-bit hash partition.
//!
//! # Design
//!
//! - MurmurHash3 x64-128 with seed 0, read as `h2 << 64 | h1`, so a cache
//!   directory populated by another MurmurHash3-routed writer maps keys to
//!   the same shards
//! - The hash is normalized to `p` in [0, 1) and [0, 1) is split into N
//!   equal-width buckets; rounding that pushes `p` to 1.0 lands in the last
//!   shard
//! - Changing N remaps existing keys

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// 2^128 as a float (exactly representable)
const TWO_POW_128: f64 = 340_282_366_920_938_463_463_374_607_431_768_211_456.0;

/// MurmurHash3 x64 128-bit variant
pub fn murmur3_x64_128(data: &[u8], seed: u64) -> u128 {
    let mut h1 = seed;
    let mut h2 = seed;

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
        let (lo, hi) = block.split_at(8);
        let k1 = u64::from_le_bytes(lo.try_into().unwrap_or_default());
        let k2 = u64::from_le_bytes(hi.try_into().unwrap_or_default());

        h1 ^= mix_k1(k1);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        h2 ^= mix_k2(le_partial(&tail[8..]));
    }
    if !tail.is_empty() {
        h1 ^= mix_k1(le_partial(&tail[..tail.len().min(8)]));
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    ((h2 as u128) << 64) | h1 as u128
}

/// Shard index in `0..num_shards` for a key
#[inline]
pub fn shard_index(key: &str, num_shards: usize) -> usize {
    let p = murmur3_x64_128(key.as_bytes(), 0) as f64 / TWO_POW_128;
    bucket_for(p, num_shards)
}

/// Bucket `j` with `j/n <= p < (j+1)/n`, falling back to the last bucket
fn bucket_for(p: f64, num_shards: usize) -> usize {
    let n = num_shards as f64;
    (0..num_shards)
        .find(|&j| j as f64 / n <= p && (j + 1) as f64 / n > p)
        .unwrap_or(num_shards.saturating_sub(1))
}

#[inline]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Little-endian load of up to 8 bytes
#[inline]
fn le_partial(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | (b as u64) << (8 * i))
}

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

// =============================================================================
// Tests
// =============================================================================
