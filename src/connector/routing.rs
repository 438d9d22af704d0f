//! Key placement.
//!
//! Two schemes, both honouring `{hash tags}` so callers can force related
//! keys onto one node:
//! - cluster slots: `slot = crc16(tag) % 16384` (CRC16-XMODEM), the store's
//!   own scheme;
//! - client shards: a consistent-hash ring with 160 virtual points per node,
//!   hashed with xxHash64. The ring is fixed when the connector is built.

use super::link::Endpoint;
use std::collections::BTreeMap;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Number of cluster hash slots.
pub const SLOT_COUNT: u16 = 16384;

/// Virtual points per shard on the ring.
pub const VIRTUAL_NODES: usize = 160;

/// The part of the key that is hashed: the content of the first non-empty
/// `{...}` section, or the whole key.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// CRC16-XMODEM (polynomial 0x1021, initial value 0).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Cluster slot of a key.
pub fn key_slot(key: &str) -> u16 {
    crc16(hash_tag(key.as_bytes())) % SLOT_COUNT
}

/// Check if every key lands in one slot. Returns the slot.
pub fn common_slot<'a>(keys: impl IntoIterator<Item = &'a str>) -> Option<u16> {
    let mut keys = keys.into_iter();
    let first = key_slot(keys.next()?);
    keys.all(|k| key_slot(k) == first).then_some(first)
}

fn hash64(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

/// Consistent-hash ring mapping keys to shard indices.
#[derive(Debug, Clone)]
pub struct ShardRing {
    points: BTreeMap<u64, usize>,
    shards: usize,
}

impl ShardRing {
    /// Build the ring for `endpoints`; shard `i` is `endpoints[i]`.
    pub fn new(endpoints: &[Endpoint]) -> Self {
        let mut points = BTreeMap::new();
        for (shard, endpoint) in endpoints.iter().enumerate() {
            for vnode in 0..VIRTUAL_NODES {
                let point = hash64(format!("{}-{}#{}", endpoint, shard, vnode).as_bytes());
                points.insert(point, shard);
            }
        }
        Self {
            points,
            shards: endpoints.len(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// Shard owning `key`: the first ring point at or after the key's hash,
    /// wrapping around.
    pub fn shard_for(&self, key: &str) -> usize {
        let hash = hash64(hash_tag(key.as_bytes()));
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, &shard)| shard)
            .unwrap_or(0)
    }

    /// Check if every key lands on one shard. Returns the shard.
    pub fn common_shard<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<usize> {
        let mut keys = keys.into_iter();
        let first = self.shard_for(keys.next()?);
        keys.all(|k| self.shard_for(k) == first).then_some(first)
    }
}
