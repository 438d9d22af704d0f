//! Hash operations.

use super::{reply, require_items, require_key, Remote};
use crate::connector::Op;
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::Command;
use bytes::Bytes;
use std::collections::BTreeMap;

impl Remote {
    /// Set one field; true when the field is new.
    pub fn hset(&self, key: &str, field: &str, value: impl AsRef<[u8]>) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("HSET", key),
            Command::new("HSET").arg(key).arg(field).arg(value),
            reply::flag,
        )
    }

    /// Set several fields at once.
    pub fn hmset<V: AsRef<[u8]>>(&self, key: &str, fields: &[(&str, V)]) -> TrellisResult<()> {
        require_key(key)?;
        require_items("field", fields)?;
        let mut command = Command::new("HMSET").arg(key);
        for (field, value) in fields {
            command = command.arg(field).arg(value);
        }
        self.call(Op::keyed("HMSET", key), command, reply::ok)
    }

    /// Set a field only if it does not exist.
    pub fn hsetnx(&self, key: &str, field: &str, value: impl AsRef<[u8]>) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("HSETNX", key),
            Command::new("HSETNX").arg(key).arg(field).arg(value),
            reply::flag,
        )
    }

    pub fn hget(&self, key: &str, field: &str) -> TrellisResult<Option<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("HGET", key),
            Command::new("HGET").arg(key).arg(field),
            reply::optional_bytes,
        )
    }

    pub fn hmget(&self, key: &str, fields: &[&str]) -> TrellisResult<Vec<Option<Bytes>>> {
        require_key(key)?;
        require_items("field", fields)?;
        self.call(
            Op::keyed("HMGET", key),
            Command::new("HMGET").arg(key).args(fields),
            reply::optional_bytes_list,
        )
    }

    /// Every field of a hash; empty when the key does not exist.
    pub fn hgetall(&self, key: &str) -> TrellisResult<BTreeMap<String, Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("HGETALL", key),
            Command::new("HGETALL").arg(key),
            reply::field_map,
        )
    }

    pub fn hdel(&self, key: &str, fields: &[&str]) -> TrellisResult<i64> {
        require_key(key)?;
        require_items("field", fields)?;
        self.call(
            Op::keyed("HDEL", key),
            Command::new("HDEL").arg(key).args(fields),
            reply::integer,
        )
    }

    pub fn hexists(&self, key: &str, field: &str) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("HEXISTS", key),
            Command::new("HEXISTS").arg(key).arg(field),
            reply::flag,
        )
    }

    pub fn hincr_by(&self, key: &str, field: &str, delta: i64) -> TrellisResult<i64> {
        require_key(key)?;
        if field.is_empty() {
            return Err(TrellisError::precondition("field must not be empty"));
        }
        self.call(
            Op::keyed("HINCRBY", key),
            Command::new("HINCRBY").arg(key).arg(field).arg_num(delta),
            reply::integer,
        )
    }

    pub fn hkeys(&self, key: &str) -> TrellisResult<Vec<String>> {
        require_key(key)?;
        self.call(
            Op::keyed("HKEYS", key),
            Command::new("HKEYS").arg(key),
            reply::strings,
        )
    }

    pub fn hlen(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("HLEN", key),
            Command::new("HLEN").arg(key),
            reply::integer,
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
    fn test_hash_round_trip() {
        let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(MemoryDialer::new())));

        assert!(remote.hset("user:1", "name", "ada").unwrap());
        assert!(!remote.hset("user:1", "name", "ada").unwrap());
        remote.hmset("user:1", &[("lang", "en"), ("age", "36")]).unwrap();
        assert!(!remote.hsetnx("user:1", "lang", "fr").unwrap());
        assert_eq!(remote.hincr_by("user:1", "age", 1).unwrap(), 37);
        assert_eq!(remote.hlen("user:1").unwrap(), 3);
        assert_eq!(remote.hkeys("user:1").unwrap(), vec!["age", "lang", "name"]);

        let all = remote.hgetall("user:1").unwrap();
        assert_eq!(all["lang"], Bytes::from("en"));
        let some = remote.hmget("user:1", &["name", "missing"]).unwrap();
        assert_eq!(some, vec![Some(Bytes::from("ada")), None]);

        assert_eq!(remote.hdel("user:1", &["name", "missing"]).unwrap(), 1);
        assert!(!remote.hexists("user:1", "name").unwrap());
        assert!(remote.hgetall("nobody").unwrap().is_empty());
        assert!(matches!(
            remote.hdel("user:1", &[]),
            Err(TrellisError::Precondition { .. })
        ));
    }
}
