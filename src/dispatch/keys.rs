//! Key-space operations: existence, deletion, expiry, rename and listing.
//!
//! Listing is cluster-wide on the clustered topology: every master is asked
//! and the results are merged. The sharded topology rejects it.

use super::{reply, require_key, require_keys, require_positive, Pipeline, Remote};
use crate::connector::{check_reply, CommandClass, Op, Route};
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::Command;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 100;

impl Remote {
    pub fn ping(&self) -> TrellisResult<()> {
        self.call(Op::keyless("PING"), Command::new("PING"), |v| {
            reply::status(v).map(|_| ())
        })
    }

    pub fn exists(&self, key: &str) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("EXISTS", key),
            Command::new("EXISTS").arg(key),
            reply::flag,
        )
    }

    /// Delete one key; true when it existed.
    pub fn del(&self, key: &str) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(Op::keyed("DEL", key), Command::new("DEL").arg(key), reply::flag)
    }

    /// Delete several keys, returning how many existed. On partitioned
    /// topologies each node gets its own batch and the deletes are not
    /// atomic as a group.
    pub fn del_many(&self, keys: &[&str]) -> TrellisResult<i64> {
        require_keys(keys)?;
        if !self.is_partitioned() {
            return self.call(
                Op::new("DEL", CommandClass::MultiKey, keys.to_vec()),
                Command::new("DEL").args(keys),
                reply::integer,
            );
        }
        let mut batch = Pipeline::new();
        for key in keys {
            batch.keyed(key, Command::new("DEL").arg(key));
        }
        let replies = self.pipeline(&batch)?;
        replies.into_iter().try_fold(0, |total, value| {
            check_reply(value)
                .and_then(reply::integer)
                .map(|n| total + n)
                .map_err(|e| TrellisError::dispatch("DEL", e))
        })
    }

    pub fn expire(&self, key: &str, seconds: u64) -> TrellisResult<bool> {
        require_key(key)?;
        require_positive("expiry", seconds)?;
        self.call(
            Op::keyed("EXPIRE", key),
            Command::new("EXPIRE").arg(key).arg_num(seconds),
            reply::flag,
        )
    }

    pub fn pexpire(&self, key: &str, millis: u64) -> TrellisResult<bool> {
        require_key(key)?;
        require_positive("expiry", millis)?;
        self.call(
            Op::keyed("PEXPIRE", key),
            Command::new("PEXPIRE").arg(key).arg_num(millis),
            reply::flag,
        )
    }

    pub fn persist(&self, key: &str) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("PERSIST", key),
            Command::new("PERSIST").arg(key),
            reply::flag,
        )
    }

    /// Remaining time to live in seconds: -1 without expiry, -2 when the
    /// key does not exist.
    pub fn ttl(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(Op::keyed("TTL", key), Command::new("TTL").arg(key), reply::integer)
    }

    /// Like [`ttl`](Self::ttl), in milliseconds.
    pub fn pttl(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("PTTL", key),
            Command::new("PTTL").arg(key),
            reply::integer,
        )
    }

    /// The stored type name, `none` when absent.
    pub fn key_type(&self, key: &str) -> TrellisResult<String> {
        require_key(key)?;
        self.call(
            Op::keyed("TYPE", key),
            Command::new("TYPE").arg(key),
            reply::status,
        )
    }

    pub fn rename(&self, from: &str, to: &str) -> TrellisResult<()> {
        require_keys(&[from, to])?;
        self.call(
            Op::new("RENAME", CommandClass::Rename, vec![from, to]),
            Command::new("RENAME").arg(from).arg(to),
            reply::ok,
        )
    }

    /// Rename only when `to` does not exist.
    pub fn renamenx(&self, from: &str, to: &str) -> TrellisResult<bool> {
        require_keys(&[from, to])?;
        self.call(
            Op::new("RENAMENX", CommandClass::Rename, vec![from, to]),
            Command::new("RENAMENX").arg(from).arg(to),
            reply::flag,
        )
    }

    /// Every key matching a glob pattern, sorted.
    pub fn keys(&self, pattern: &str) -> TrellisResult<Vec<String>> {
        let op = Op::new("KEYS", CommandClass::KeyListing, Vec::new());
        let command = Command::new("KEYS").arg(pattern);
        self.fan_out(&op, |remote, route| {
            remote.execute_routed("KEYS", route, |link| reply::strings(link.request(&command)?))
        })
    }

    /// Like [`keys`](Self::keys), iterating with SCAN so no node blocks on
    /// one large reply.
    pub fn scan_keys(&self, pattern: &str) -> TrellisResult<Vec<String>> {
        let op = Op::new("SCAN", CommandClass::KeyListing, Vec::new());
        self.fan_out(&op, |remote, route| {
            remote.execute_routed("SCAN", route, |link| {
                let mut found = Vec::new();
                let mut cursor = "0".to_string();
                loop {
                    let command = Command::new("SCAN")
                        .arg(&cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg_num(SCAN_BATCH);
                    let (next, keys) = reply::scan_page(link.request(&command)?)?;
                    found.extend(keys);
                    if next == "0" {
                        return Ok(found);
                    }
                    cursor = next;
                }
            })
        })
    }

    /// Run a listing on every node and merge.
    fn fan_out<F>(&self, op: &Op<'_>, mut list: F) -> TrellisResult<Vec<String>>
    where
        F: FnMut(&Self, Route<'static>) -> TrellisResult<Vec<String>>,
    {
        self.admit(op)?;
        let routes = self
            .connector()
            .fan_out()
            .map_err(|e| TrellisError::dispatch(op.name, e))?;
        let mut merged = Vec::new();
        for route in routes {
            merged.extend(list(self, route)?);
        }
        merged.sort();
        merged.dedup();
        Ok(merged)
    }
}
