//! Bitmap and HyperLogLog operations.

use super::{reply, require_items, require_key, require_keys, Remote};
use crate::connector::{CommandClass, Op};
use crate::core::error::TrellisResult;
use crate::protocol::Command;

/// BITOP operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
    Not,
}

impl BitOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Not => "NOT",
        }
    }
}

impl Remote {
    /// Set or clear one bit, returning its previous value.
    pub fn setbit(&self, key: &str, offset: u64, on: bool) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("SETBIT", key),
            Command::new("SETBIT")
                .arg(key)
                .arg_num(offset)
                .arg(if on { "1" } else { "0" }),
            reply::flag,
        )
    }

    pub fn getbit(&self, key: &str, offset: u64) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("GETBIT", key),
            Command::new("GETBIT").arg(key).arg_num(offset),
            reply::flag,
        )
    }

    /// Number of set bits.
    pub fn bitcount(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("BITCOUNT", key),
            Command::new("BITCOUNT").arg(key),
            reply::integer,
        )
    }

    /// Combine bitmaps into `destination`, returning the result's length in
    /// bytes.
    pub fn bitop(&self, op: BitOp, destination: &str, sources: &[&str]) -> TrellisResult<i64> {
        require_key(destination)?;
        require_keys(sources)?;
        let mut keys = vec![destination];
        keys.extend_from_slice(sources);
        self.call(
            Op::new("BITOP", CommandClass::MultiKey, keys),
            Command::new("BITOP")
                .arg(op.as_str())
                .arg(destination)
                .args(sources),
            reply::integer,
        )
    }

    /// Add elements to a HyperLogLog; true when its estimate changed.
    pub fn pfadd<V: AsRef<[u8]>>(&self, key: &str, elements: &[V]) -> TrellisResult<bool> {
        require_key(key)?;
        require_items("element", elements)?;
        self.call(
            Op::keyed("PFADD", key),
            Command::new("PFADD").arg(key).args(elements),
            reply::flag,
        )
    }

    /// Estimated cardinality of the union of one or more HyperLogLogs.
    pub fn pfcount(&self, keys: &[&str]) -> TrellisResult<i64> {
        require_keys(keys)?;
        let op = match keys {
            [key] => Op::keyed("PFCOUNT", key),
            _ => Op::new("PFCOUNT", CommandClass::MultiKey, keys.to_vec()),
        };
        self.call(op, Command::new("PFCOUNT").args(keys), reply::integer)
    }
}
