//! Set operations.

use super::{reply, require_items, require_key, require_keys, Remote};
use crate::connector::{CommandClass, Op};
use crate::core::error::TrellisResult;
use crate::protocol::Command;
use bytes::Bytes;

impl Remote {
    /// Add members, returning how many were new.
    pub fn sadd<V: AsRef<[u8]>>(&self, key: &str, members: &[V]) -> TrellisResult<i64> {
        require_key(key)?;
        require_items("member", members)?;
        self.call(
            Op::keyed("SADD", key),
            Command::new("SADD").arg(key).args(members),
            reply::integer,
        )
    }

    pub fn srem<V: AsRef<[u8]>>(&self, key: &str, members: &[V]) -> TrellisResult<i64> {
        require_key(key)?;
        require_items("member", members)?;
        self.call(
            Op::keyed("SREM", key),
            Command::new("SREM").arg(key).args(members),
            reply::integer,
        )
    }

    pub fn smembers(&self, key: &str) -> TrellisResult<Vec<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("SMEMBERS", key),
            Command::new("SMEMBERS").arg(key),
            reply::bytes_list,
        )
    }

    pub fn sismember(&self, key: &str, member: impl AsRef<[u8]>) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("SISMEMBER", key),
            Command::new("SISMEMBER").arg(key).arg(member),
            reply::flag,
        )
    }

    pub fn scard(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("SCARD", key),
            Command::new("SCARD").arg(key),
            reply::integer,
        )
    }

    /// Remove and return an arbitrary member.
    pub fn spop(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("SPOP", key),
            Command::new("SPOP").arg(key),
            reply::optional_bytes,
        )
    }

    /// Atomically move a member between sets; true when it was moved.
    pub fn smove(
        &self,
        source: &str,
        destination: &str,
        member: impl AsRef<[u8]>,
    ) -> TrellisResult<bool> {
        require_keys(&[source, destination])?;
        self.call(
            Op::new("SMOVE", CommandClass::MultiKey, vec![source, destination]),
            Command::new("SMOVE").arg(source).arg(destination).arg(member),
            reply::flag,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, MemoryDialer, Topology};
    use crate::core::config::TopologyConfig;
    use std::sync::Arc;

    #[test]
    fn test_set_round_trip() {
        let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(MemoryDialer::new())));
        assert_eq!(remote.sadd("tags", &["a", "b", "a"]).unwrap(), 2);
        assert!(remote.sismember("tags", "a").unwrap());
        assert_eq!(remote.scard("tags").unwrap(), 2);
        assert!(remote.smove("tags", "other", "b").unwrap());
        assert!(!remote.smove("tags", "other", "b").unwrap());
        assert_eq!(remote.smembers("other").unwrap(), vec![Bytes::from("b")]);
        assert_eq!(remote.srem("tags", &["a"]).unwrap(), 1);
        assert_eq!(remote.spop("tags").unwrap(), None);
    }
}
