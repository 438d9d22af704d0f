//! List operations.

use super::{reply, require_items, require_key, require_keys, require_positive, Remote};
use crate::connector::{CommandClass, Op};
use crate::core::error::TrellisResult;
use crate::protocol::Command;
use bytes::Bytes;

impl Remote {
    /// Push values to the head, returning the new length.
    pub fn lpush<V: AsRef<[u8]>>(&self, key: &str, values: &[V]) -> TrellisResult<i64> {
        self.push("LPUSH", key, values)
    }

    /// Push values to the tail, returning the new length.
    pub fn rpush<V: AsRef<[u8]>>(&self, key: &str, values: &[V]) -> TrellisResult<i64> {
        self.push("RPUSH", key, values)
    }

    fn push<V: AsRef<[u8]>>(&self, name: &'static str, key: &str, values: &[V]) -> TrellisResult<i64> {
        require_key(key)?;
        require_items("value", values)?;
        self.call(
            Op::keyed(name, key),
            Command::new(name).arg(key).args(values),
            reply::integer,
        )
    }

    pub fn lpop(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("LPOP", key),
            Command::new("LPOP").arg(key),
            reply::optional_bytes,
        )
    }

    pub fn rpop(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("RPOP", key),
            Command::new("RPOP").arg(key),
            reply::optional_bytes,
        )
    }

    /// Elements between two inclusive indexes; negative indexes count from
    /// the tail.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> TrellisResult<Vec<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("LRANGE", key),
            Command::new("LRANGE").arg(key).arg_num(start).arg_num(stop),
            reply::bytes_list,
        )
    }

    /// One page of a list. Bounds are `[page * size, (page + 1) * size]`,
    /// both inclusive, so consecutive pages share their boundary element.
    pub fn lrange_page(&self, key: &str, page: u64, page_size: u64) -> TrellisResult<Vec<Bytes>> {
        require_key(key)?;
        require_positive("page size", page_size)?;
        let start = page.saturating_mul(page_size);
        let stop = page.saturating_add(1).saturating_mul(page_size);
        self.lrange(
            key,
            i64::try_from(start).unwrap_or(i64::MAX),
            i64::try_from(stop).unwrap_or(i64::MAX),
        )
    }

    pub fn lindex(&self, key: &str, index: i64) -> TrellisResult<Option<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("LINDEX", key),
            Command::new("LINDEX").arg(key).arg_num(index),
            reply::optional_bytes,
        )
    }

    pub fn llen(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("LLEN", key),
            Command::new("LLEN").arg(key),
            reply::integer,
        )
    }

    /// Remove occurrences of `value`: the first `count` from the head when
    /// positive, from the tail when negative, all when zero.
    pub fn lrem(&self, key: &str, count: i64, value: impl AsRef<[u8]>) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("LREM", key),
            Command::new("LREM").arg(key).arg_num(count).arg(value),
            reply::integer,
        )
    }

    /// Keep only the elements between two inclusive indexes.
    pub fn ltrim(&self, key: &str, start: i64, stop: i64) -> TrellisResult<()> {
        require_key(key)?;
        self.call(
            Op::keyed("LTRIM", key),
            Command::new("LTRIM").arg(key).arg_num(start).arg_num(stop),
            reply::ok,
        )
    }

    pub fn lset(&self, key: &str, index: i64, value: impl AsRef<[u8]>) -> TrellisResult<()> {
        require_key(key)?;
        self.call(
            Op::keyed("LSET", key),
            Command::new("LSET").arg(key).arg_num(index).arg(value),
            reply::ok,
        )
    }

    /// Atomically move the tail of `source` to the head of `destination`.
    pub fn rpoplpush(&self, source: &str, destination: &str) -> TrellisResult<Option<Bytes>> {
        require_keys(&[source, destination])?;
        self.call(
            Op::new("RPOPLPUSH", CommandClass::MultiKey, vec![source, destination]),
            Command::new("RPOPLPUSH").arg(source).arg(destination),
            reply::optional_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, MemoryDialer, Topology};
    use crate::core::config::TopologyConfig;
    use crate::core::error::TrellisError;
    use std::sync::Arc;

    fn remote(topology: Topology, nodes: &[&str]) -> Remote {
        let config = TopologyConfig::new(topology, nodes.iter().copied());
        Remote::new(Connector::new(&config, Arc::new(MemoryDialer::new())))
    }

    #[test]
    fn test_pages_share_boundary() {
        let remote = remote(Topology::Standalone, &["127.0.0.1"]);
        let values: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        remote.rpush("l", &values).unwrap();
        let first = remote.lrange_page("l", 0, 3).unwrap();
        let second = remote.lrange_page("l", 1, 3).unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first.last(), second.first());
        assert!(matches!(
            remote.lrange_page("l", 0, 0),
            Err(TrellisError::Precondition { .. })
        ));
    }

    #[test]
    fn test_list_mutations() {
        let remote = remote(Topology::Standalone, &["127.0.0.1"]);
        remote.rpush("l", &["a", "b", "a", "c"]).unwrap();
        assert_eq!(remote.lrem("l", 1, "a").unwrap(), 1);
        remote.lset("l", 0, "z").unwrap();
        assert_eq!(remote.lindex("l", 0).unwrap(), Some(Bytes::from("z")));
        remote.ltrim("l", 0, 1).unwrap();
        assert_eq!(remote.llen("l").unwrap(), 2);
        assert_eq!(remote.rpoplpush("l", "m").unwrap(), Some(Bytes::from("a")));
        assert_eq!(remote.lpop("m").unwrap(), Some(Bytes::from("a")));
        assert_eq!(remote.rpop("m").unwrap(), None);
    }

    #[test]
    fn test_rpoplpush_needs_common_shard() {
        let remote = remote(Topology::Sharded, &["10.0.0.1:7000", "10.0.0.2:7000"]);
        assert!(remote.rpoplpush("{q}:in", "{q}:out").is_ok());
        let spread: Vec<(String, String)> =
            (0..16).map(|i| (format!("src{}", i), format!("dst{}", i))).collect();
        let rejected = spread
            .iter()
            .filter(|(a, b)| {
                matches!(
                    remote.rpoplpush(a, b),
                    Err(TrellisError::UnsupportedForTopology { .. })
                )
            })
            .count();
        assert!(rejected > 0);
    }
}
