//! Bloom filter over a remote bitmap.
//!
//! The filter owns no state beyond its descriptor `(M, k)`; the bits live in
//! the remote store under the filter's key. Offsets come from double hashing
//! with 32-bit MurmurHash2:
//!
//! ```text
//! h1 = murmur2(bytes, 0)
//! h2 = murmur2(bytes, h1)
//! offset_i = |(h1 + i * h2) mod M|      i in [0, k), 32-bit wrapping sum
//! ```
//!
//! so filters written by other clients using the same scheme interoperate.
//! `add` checks before it sets; two racing adds of the same new value may
//! both report "newly added".

use crate::connector::{check_reply, Op};
use crate::core::config::{BloomConfig, MAX_BLOOM_BITS};
use crate::core::error::{TrellisError, TrellisResult};
use crate::dispatch::{reply, Remote};
use crate::protocol::Command;

/// MurmurHash2, 32-bit, little-endian blocks.
pub fn murmur2(data: &[u8], seed: i32) -> i32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = (seed as u32) ^ (data.len() as u32);
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut last = [0u8; 4];
        last[..tail.len()].copy_from_slice(tail);
        h ^= u32::from_le_bytes(last);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h as i32
}

/// A filter descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomFilter {
    bit_count: u64,
    hash_count: u32,
}

impl BloomFilter {
    pub fn new(config: BloomConfig) -> TrellisResult<Self> {
        if config.bit_count == 0 || config.bit_count > MAX_BLOOM_BITS {
            return Err(TrellisError::configuration(format!(
                "bloom bit_count must be in 1..={}, got {}",
                MAX_BLOOM_BITS, config.bit_count
            )));
        }
        if config.hash_count == 0 {
            return Err(TrellisError::configuration("bloom hash_count must be at least 1"));
        }
        Ok(Self {
            bit_count: config.bit_count,
            hash_count: config.hash_count,
        })
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Bit offsets for a serialized value.
    pub fn offsets(&self, bytes: &[u8]) -> Vec<u64> {
        let h1 = murmur2(bytes, 0);
        let h2 = murmur2(bytes, h1);
        let modulus = self.bit_count as i64;
        (0..self.hash_count)
            .map(|i| {
                let combined = h1.wrapping_add((i as i32).wrapping_mul(h2));
                (i64::from(combined) % modulus).unsigned_abs()
            })
            .collect()
    }

    /// Expected false-positive rate after `inserted` distinct values.
    pub fn false_positive_rate(&self, inserted: u64) -> f64 {
        let k = f64::from(self.hash_count);
        let exponent = -k * inserted as f64 / self.bit_count as f64;
        (1.0 - exponent.exp()).powf(k)
    }

    /// True iff every offset bit is set. Stops at the first clear bit; all
    /// lookups share one leased connection.
    pub fn contains(&self, remote: &Remote, key: &str, bytes: &[u8]) -> TrellisResult<bool> {
        require_filter_key(key)?;
        let offsets = self.offsets(bytes);
        remote.execute(&Op::keyed("GETBIT", key), |link| {
            for offset in &offsets {
                let bit = link.request(&Command::new("GETBIT").arg(key).arg_num(offset))?;
                if !reply::flag(bit)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    /// Set the value's bits. Returns false without writing when the filter
    /// already reports the value as present.
    pub fn add(&self, remote: &Remote, key: &str, bytes: &[u8]) -> TrellisResult<bool> {
        if self.contains(remote, key, bytes)? {
            return Ok(false);
        }
        let commands: Vec<Command> = self
            .offsets(bytes)
            .into_iter()
            .map(|offset| Command::new("SETBIT").arg(key).arg_num(offset).arg("1"))
            .collect();
        remote.execute_void(&Op::keyed("SETBIT", key), |link| {
            for value in link.pipeline(&commands)? {
                check_reply(value)?;
            }
            Ok(())
        })?;
        Ok(true)
    }
}

fn require_filter_key(key: &str) -> TrellisResult<()> {
    if key.is_empty() {
        return Err(TrellisError::precondition("filter key must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, MemoryDialer, Topology};
    use crate::core::config::TopologyConfig;
    use std::sync::Arc;

    #[test]
    fn test_murmur2_reference_values() {
        assert_eq!(murmur2(b"", 0), 0);
        assert_eq!(murmur2(b"hello", 0), -446_617_141);
        assert_eq!(murmur2(b"hello", -446_617_141), -1_529_287_162);
    }

    #[test]
    fn test_offsets_match_reference() {
        let filter = BloomFilter::new(BloomConfig {
            bit_count: 1000,
            hash_count: 4,
        })
        .unwrap();
        assert_eq!(filter.offsets(b"hello"), vec![141, 303, 831, 331]);

        let default = BloomFilter::new(BloomConfig::default()).unwrap();
        assert_eq!(
            default.offsets(b"a"),
            vec![
                1_838_653_602,
                309_068_860,
                1_220_515_882,
                1_544_866_672,
                15_281_930,
                1_514_302_812,
                1_251_079_742,
                278_505_000
            ]
        );
    }

    #[test]
    fn test_offsets_stay_in_range() {
        let filter = BloomFilter::new(BloomConfig {
            bit_count: 97,
            hash_count: 16,
        })
        .unwrap();
        for i in 0..500 {
            assert!(filter.offsets(format!("v{}", i).as_bytes()).iter().all(|&o| o < 97));
        }
    }

    #[test]
    fn test_descriptor_validation() {
        for (bit_count, hash_count) in [(0, 8), (MAX_BLOOM_BITS + 1, 8), (1024, 0)] {
            assert!(BloomFilter::new(BloomConfig {
                bit_count,
                hash_count
            })
            .is_err());
        }
    }

    #[test]
    fn test_add_then_contains() {
        let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(MemoryDialer::new())));
        let filter = BloomFilter::new(BloomConfig::default()).unwrap();
        assert!(!filter.contains(&remote, "seen", b"x").unwrap());
        assert!(filter.add(&remote, "seen", b"x").unwrap());
        assert!(!filter.add(&remote, "seen", b"x").unwrap());
        assert!(filter.contains(&remote, "seen", b"x").unwrap());
    }
}
