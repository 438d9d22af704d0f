//! Sorted set operations.

use super::{reply, require_items, require_key, Remote};
use crate::connector::Op;
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::Command;
use bytes::Bytes;

fn require_score(score: f64) -> TrellisResult<()> {
    if score.is_nan() {
        return Err(TrellisError::precondition("score must be a number"));
    }
    Ok(())
}

impl Remote {
    /// Add or update members by score, returning how many were new.
    pub fn zadd<V: AsRef<[u8]>>(&self, key: &str, members: &[(f64, V)]) -> TrellisResult<i64> {
        require_key(key)?;
        require_items("member", members)?;
        let mut command = Command::new("ZADD").arg(key);
        for (score, member) in members {
            require_score(*score)?;
            command = command.arg_num(score).arg(member);
        }
        self.call(Op::keyed("ZADD", key), command, reply::integer)
    }

    pub fn zrem<V: AsRef<[u8]>>(&self, key: &str, members: &[V]) -> TrellisResult<i64> {
        require_key(key)?;
        require_items("member", members)?;
        self.call(
            Op::keyed("ZREM", key),
            Command::new("ZREM").arg(key).args(members),
            reply::integer,
        )
    }

    pub fn zscore(&self, key: &str, member: impl AsRef<[u8]>) -> TrellisResult<Option<f64>> {
        require_key(key)?;
        self.call(
            Op::keyed("ZSCORE", key),
            Command::new("ZSCORE").arg(key).arg(member),
            reply::optional_float,
        )
    }

    /// Add `delta` to a member's score, returning the new score.
    pub fn zincr_by(&self, key: &str, delta: f64, member: impl AsRef<[u8]>) -> TrellisResult<f64> {
        require_key(key)?;
        require_score(delta)?;
        self.call(
            Op::keyed("ZINCRBY", key),
            Command::new("ZINCRBY").arg(key).arg_num(delta).arg(member),
            reply::float,
        )
    }

    pub fn zcard(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("ZCARD", key),
            Command::new("ZCARD").arg(key),
            reply::integer,
        )
    }

    /// Members by rank, lowest score first; inclusive indexes.
    pub fn zrange(&self, key: &str, start: i64, stop: i64) -> TrellisResult<Vec<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("ZRANGE", key),
            Command::new("ZRANGE").arg(key).arg_num(start).arg_num(stop),
            reply::bytes_list,
        )
    }

    /// Members with `min <= score <= max`. Infinite bounds are allowed.
    pub fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> TrellisResult<Vec<Bytes>> {
        require_key(key)?;
        require_score(min)?;
        require_score(max)?;
        self.call(
            Op::keyed("ZRANGEBYSCORE", key),
            Command::new("ZRANGEBYSCORE").arg(key).arg_num(min).arg_num(max),
            reply::bytes_list,
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
    fn test_leaderboard() {
        let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(MemoryDialer::new())));
        assert_eq!(
            remote
                .zadd("board", &[(10.0, "ann"), (5.0, "bob"), (7.5, "cy")])
                .unwrap(),
            3
        );
        assert_eq!(remote.zincr_by("board", 10.0, "bob").unwrap(), 15.0);
        assert_eq!(
            remote.zrange("board", 0, -1).unwrap(),
            vec![Bytes::from("cy"), Bytes::from("ann"), Bytes::from("bob")]
        );
        assert_eq!(
            remote.zrange_by_score("board", 8.0, f64::INFINITY).unwrap(),
            vec![Bytes::from("ann"), Bytes::from("bob")]
        );
        assert_eq!(remote.zscore("board", "cy").unwrap(), Some(7.5));
        assert_eq!(remote.zscore("board", "zed").unwrap(), None);
        assert_eq!(remote.zrem("board", &["cy"]).unwrap(), 1);
        assert_eq!(remote.zcard("board").unwrap(), 2);
        assert!(remote.zadd("board", &[(f64::NAN, "x")]).is_err());
    }
}
