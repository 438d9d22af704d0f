//! Two-tier coordinator.
//!
//! [`TieredCache`] puts a [`LocalTier`] in front of a [`Remote`] and keeps
//! them loosely coherent:
//!
//! ```text
//!   read ──► local hit? ──yes──► value
//!               │ no
//!               ▼
//!           remote read ──present──► fill local ──► value
//!               │ absent
//!               ▼
//!             None          (absence is never cached)
//!
//!   set  ──► remote write ──► local put     (invalidate on failure)
//!   mutate ──► remote write ──► local invalidate (always)
//!   del  ──► local invalidate ──► remote delete
//! ```
//!
//! Structural mutations never patch local state; they drop the entry and the
//! next read refills it. Local entries expire on their own schedule, so the
//! tiers may disagree on liveness until the local entry expires or is
//! invalidated. Writes racing from two threads are not ordered as a pair.

use crate::bloom::BloomFilter;
use crate::codec::{Codec, JsonCodec};
use crate::connector::LinkResult;
use crate::core::error::{TrellisError, TrellisResult};
use crate::dispatch::{reply, Pipeline, Remote};
use crate::local::{Cached, LocalTier, Lookup};
use crate::lock;
use crate::protocol::{Command, RedisValue};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Local tier plus remote store for one instance.
#[derive(Debug)]
pub struct TieredCache<C: Codec = JsonCodec> {
    remote: Remote,
    local: LocalTier,
    bloom: BloomFilter,
    codec: C,
}

impl TieredCache<JsonCodec> {
    pub fn new(remote: Remote, local: LocalTier, bloom: BloomFilter) -> Self {
        Self::with_codec(remote, local, bloom, JsonCodec)
    }
}

impl<C: Codec> TieredCache<C> {
    pub fn with_codec(remote: Remote, local: LocalTier, bloom: BloomFilter, codec: C) -> Self {
        Self {
            remote,
            local,
            bloom,
            codec,
        }
    }

    /// The remote operation set, bypassing the local tier.
    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }

    /// Drop every local entry. The remote store is untouched.
    pub fn clear_local(&self) {
        self.local.invalidate_all();
    }

    // Strings

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> TrellisResult<Option<T>> {
        self.get_bytes(key)?
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    /// Read the stored form of `key`.
    pub fn get_bytes(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        let found = self.local.get_or_load(key, || {
            let value = self.remote.get(key)?;
            tracing::trace!(key, found = value.is_some(), "local miss");
            Ok::<_, TrellisError>(value.map(Cached::scalar).into())
        })?;
        match found {
            Lookup::Present(Cached::Scalar(value)) => Ok(Some(value)),
            Lookup::Present(_) => {
                // Snapshot of a hash or set under this key; the remote read
                // reports the type mismatch.
                self.local.invalidate(key);
                self.remote.get(key)
            }
            Lookup::Absent => Ok(None),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> TrellisResult<()> {
        let bytes = self.codec.encode(value)?;
        let written = self.remote.set(key, &bytes).map(|()| true);
        self.write_through(key, bytes, written).map(|_| ())
    }

    /// Set with a remote TTL. The local entry keeps its own expiry policy.
    pub fn set_px<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> TrellisResult<()> {
        let bytes = self.codec.encode(value)?;
        let written = self.remote.set_px(key, &bytes, millis(ttl)).map(|()| true);
        self.write_through(key, bytes, written).map(|_| ())
    }

    pub fn set_nx<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> TrellisResult<bool> {
        let bytes = self.codec.encode(value)?;
        let written = self.remote.set_nx(key, &bytes);
        self.write_through(key, bytes, written)
    }

    pub fn set_nx_px<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> TrellisResult<bool> {
        let bytes = self.codec.encode(value)?;
        let written = self.remote.set_nx_px(key, &bytes, millis(ttl));
        self.write_through(key, bytes, written)
    }

    // Keys

    pub fn del(&self, key: &str) -> TrellisResult<bool> {
        self.local.invalidate(key);
        self.remote.del(key)
    }

    pub fn del_many(&self, keys: &[&str]) -> TrellisResult<i64> {
        for key in keys {
            self.local.invalidate(key);
        }
        self.remote.del_many(keys)
    }

    /// Asks the remote store; a local entry may outlive the remote key.
    pub fn exists(&self, key: &str) -> TrellisResult<bool> {
        self.remote.exists(key)
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> TrellisResult<bool> {
        self.remote.pexpire(key, millis(ttl))
    }

    pub fn persist(&self, key: &str) -> TrellisResult<bool> {
        self.remote.persist(key)
    }

    pub fn ttl(&self, key: &str) -> TrellisResult<i64> {
        self.remote.ttl(key)
    }

    // Counters

    /// Add `delta`, optionally (re)setting the key's TTL in the same round
    /// trip.
    pub fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> TrellisResult<i64> {
        self.mutate(key, || match ttl {
            None => self.remote.incr_by(key, delta),
            Some(ttl) => self.with_expiry(
                key,
                Command::new("INCRBY").arg(key).arg_num(delta),
                ttl,
                reply::integer,
            ),
        })
    }

    pub fn decr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> TrellisResult<i64> {
        self.mutate(key, || match ttl {
            None => self.remote.decr_by(key, delta),
            Some(ttl) => self.with_expiry(
                key,
                Command::new("DECRBY").arg(key).arg_num(delta),
                ttl,
                reply::integer,
            ),
        })
    }

    // Lists

    pub fn lpush<V: Serialize>(&self, key: &str, values: &[V]) -> TrellisResult<i64> {
        let encoded = self.encode_all(values)?;
        self.mutate(key, || self.remote.lpush(key, &encoded))
    }

    pub fn rpush<V: Serialize>(&self, key: &str, values: &[V]) -> TrellisResult<i64> {
        let encoded = self.encode_all(values)?;
        self.mutate(key, || self.remote.rpush(key, &encoded))
    }

    /// Append and (re)set the list's TTL in one round trip.
    pub fn rpush_expiring<V: Serialize>(
        &self,
        key: &str,
        values: &[V],
        ttl: Duration,
    ) -> TrellisResult<i64> {
        if values.is_empty() {
            return Err(TrellisError::precondition("at least one value is required"));
        }
        let encoded = self.encode_all(values)?;
        self.mutate(key, || {
            self.with_expiry(
                key,
                Command::new("RPUSH").arg(key).args(&encoded),
                ttl,
                reply::integer,
            )
        })
    }

    pub fn lpop<T: DeserializeOwned>(&self, key: &str) -> TrellisResult<Option<T>> {
        let popped = self.mutate(key, || self.remote.lpop(key))?;
        popped.map(|bytes| self.codec.decode(&bytes)).transpose()
    }

    pub fn rpop<T: DeserializeOwned>(&self, key: &str) -> TrellisResult<Option<T>> {
        let popped = self.mutate(key, || self.remote.rpop(key))?;
        popped.map(|bytes| self.codec.decode(&bytes)).transpose()
    }

    pub fn lrem<V: Serialize + ?Sized>(&self, key: &str, count: i64, value: &V) -> TrellisResult<i64> {
        let bytes = self.codec.encode(value)?;
        self.mutate(key, || self.remote.lrem(key, count, &bytes))
    }

    pub fn ltrim(&self, key: &str, start: i64, stop: i64) -> TrellisResult<()> {
        self.mutate(key, || self.remote.ltrim(key, start, stop))
    }

    pub fn lrange<T: DeserializeOwned>(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> TrellisResult<Vec<T>> {
        self.decode_all(self.remote.lrange(key, start, stop)?)
    }

    pub fn llen(&self, key: &str) -> TrellisResult<i64> {
        self.remote.llen(key)
    }

    // Sets

    pub fn sadd<V: Serialize>(&self, key: &str, members: &[V]) -> TrellisResult<i64> {
        let encoded = self.encode_all(members)?;
        self.mutate(key, || self.remote.sadd(key, &encoded))
    }

    pub fn srem<V: Serialize>(&self, key: &str, members: &[V]) -> TrellisResult<i64> {
        let encoded = self.encode_all(members)?;
        self.mutate(key, || self.remote.srem(key, &encoded))
    }

    /// All members, from a local snapshot when one exists.
    pub fn smembers<T: DeserializeOwned>(&self, key: &str) -> TrellisResult<Vec<T>> {
        if let Lookup::Present(Cached::Members(members)) = self.local.get(key) {
            return self.decode_all(members.iter().cloned());
        }
        let members = self.remote.smembers(key)?;
        if let Some(snapshot) = Cached::members(members.clone()) {
            self.local.put(key, snapshot);
        }
        self.decode_all(members)
    }

    pub fn sismember<V: Serialize + ?Sized>(&self, key: &str, member: &V) -> TrellisResult<bool> {
        let bytes = self.codec.encode(member)?;
        self.remote.sismember(key, &bytes)
    }

    // Hashes

    pub fn hset<V: Serialize + ?Sized>(&self, key: &str, field: &str, value: &V) -> TrellisResult<bool> {
        let bytes = self.codec.encode(value)?;
        self.mutate(key, || self.remote.hset(key, field, &bytes))
    }

    pub fn hmset<V: Serialize>(&self, key: &str, fields: &[(&str, V)]) -> TrellisResult<()> {
        let encoded = fields
            .iter()
            .map(|(field, value)| -> TrellisResult<(&str, Bytes)> {
                Ok((*field, self.codec.encode(value)?))
            })
            .collect::<TrellisResult<Vec<_>>>()?;
        self.mutate(key, || self.remote.hmset(key, &encoded))
    }

    pub fn hdel(&self, key: &str, fields: &[&str]) -> TrellisResult<i64> {
        self.mutate(key, || self.remote.hdel(key, fields))
    }

    pub fn hincr_by(&self, key: &str, field: &str, delta: i64) -> TrellisResult<i64> {
        self.mutate(key, || self.remote.hincr_by(key, field, delta))
    }

    /// One field. A local miss fetches and caches the whole hash so later
    /// field reads of the same key stay local.
    pub fn hget<T: DeserializeOwned>(&self, key: &str, field: &str) -> TrellisResult<Option<T>> {
        if let Lookup::Present(Cached::Hash(fields)) = self.local.get(key) {
            if let Some(value) = fields.get(field) {
                return self.codec.decode(value).map(Some);
            }
        }
        let mut fields = self.load_hash(key)?;
        fields
            .remove(field)
            .map(|value| self.codec.decode(&value))
            .transpose()
    }

    pub fn hget_all<T: DeserializeOwned>(&self, key: &str) -> TrellisResult<BTreeMap<String, T>> {
        let fields = match self.local.get(key) {
            Lookup::Present(Cached::Hash(fields)) => (*fields).clone(),
            _ => self.load_hash(key)?,
        };
        fields
            .into_iter()
            .map(|(field, value)| -> TrellisResult<(String, T)> {
                Ok((field, self.codec.decode(&value)?))
            })
            .collect()
    }

    // Coordination

    /// Add `value` to the filter at `key`. True when it was not already
    /// reported present.
    pub fn bloom_add<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> TrellisResult<bool> {
        let bytes = self.codec.encode(value)?;
        self.bloom.add(&self.remote, key, &bytes)
    }

    pub fn bloom_contains<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> TrellisResult<bool> {
        let bytes = self.codec.encode(value)?;
        self.bloom.contains(&self.remote, key, &bytes)
    }

    pub fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> TrellisResult<bool> {
        lock::acquire(&self.remote, key, token, ttl)
    }

    pub fn release_lock(&self, key: &str, token: &str) -> TrellisResult<bool> {
        lock::release(&self.remote, key, token)
    }

    /// Mirror a remote write of `bytes` locally. A failed write may still
    /// have reached the store, so the local entry is dropped rather than
    /// kept.
    fn write_through(
        &self,
        key: &str,
        bytes: Bytes,
        written: TrellisResult<bool>,
    ) -> TrellisResult<bool> {
        match written {
            Ok(true) => self.local.put(key, Cached::Scalar(bytes)),
            Ok(false) => {}
            Err(_) => self.local.invalidate(key),
        }
        written
    }

    /// Run a structural write of `key` and drop its local entry whatever the
    /// outcome.
    fn mutate<T>(&self, key: &str, write: impl FnOnce() -> TrellisResult<T>) -> TrellisResult<T> {
        let result = write();
        self.local.invalidate(key);
        result
    }

    fn load_hash(&self, key: &str) -> TrellisResult<BTreeMap<String, Bytes>> {
        let fields = self.remote.hgetall(key)?;
        if let Some(snapshot) = Cached::hash(fields.clone()) {
            self.local.put(key, snapshot);
        }
        Ok(fields)
    }

    /// Send `command` and a PEXPIRE for `key` as one pipelined pair and parse
    /// the first reply.
    fn with_expiry<T>(
        &self,
        key: &str,
        command: Command,
        ttl: Duration,
        parse: impl Fn(RedisValue) -> LinkResult<T>,
    ) -> TrellisResult<T> {
        let ttl_ms = millis(ttl);
        if ttl_ms == 0 {
            return Err(TrellisError::precondition("ttl must be at least 1ms"));
        }
        if key.is_empty() {
            return Err(TrellisError::precondition("key must not be empty"));
        }
        let mut batch = Pipeline::new();
        batch
            .keyed(key, command)
            .keyed(key, Command::new("PEXPIRE").arg(key).arg_num(ttl_ms));
        let first = self
            .remote
            .pipeline_checked(&batch)?
            .into_iter()
            .next()
            .unwrap_or(RedisValue::Null);
        parse(first).map_err(|e| TrellisError::dispatch("PIPELINE", e))
    }

    fn encode_all<V: Serialize>(&self, values: &[V]) -> TrellisResult<Vec<Bytes>> {
        values.iter().map(|value| self.codec.encode(value)).collect()
    }

    fn decode_all<T: DeserializeOwned>(
        &self,
        values: impl IntoIterator<Item = Bytes>,
    ) -> TrellisResult<Vec<T>> {
        values
            .into_iter()
            .map(|value| self.codec.decode(&value))
            .collect()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, MemoryDialer, Topology};
    use crate::core::config::{BloomConfig, LocalTierConfig, TopologyConfig};
    use std::sync::Arc;

    fn cache() -> (TieredCache, MemoryDialer) {
        let dialer = MemoryDialer::new();
        let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));
        let local = LocalTier::new(&LocalTierConfig::default());
        let bloom = BloomFilter::new(BloomConfig::default()).unwrap();
        (TieredCache::new(remote, local, bloom), dialer)
    }

    #[test]
    fn test_read_hits_local_after_write() {
        let (cache, dialer) = cache();
        cache.set("greeting", "hi").unwrap();
        let before = dialer.command_count();
        assert_eq!(cache.get::<String>("greeting").unwrap().as_deref(), Some("hi"));
        assert_eq!(dialer.command_count(), before);
    }

    #[test]
    fn test_counter_with_ttl_sets_expiry() {
        let (cache, _) = cache();
        assert_eq!(cache.incr_by("hits", 2, Some(Duration::from_secs(60))).unwrap(), 2);
        let ttl = cache.ttl("hits").unwrap();
        assert!(ttl > 0 && ttl <= 60);
        assert_eq!(cache.decr_by("hits", 1, None).unwrap(), 1);
        assert_eq!(cache.get::<i64>("hits").unwrap(), Some(1));
    }

    #[test]
    fn test_hget_miss_loads_whole_hash() {
        let (cache, dialer) = cache();
        cache
            .hmset("user:1", &[("name", "ada"), ("lang", "en")])
            .unwrap();
        assert_eq!(cache.hget::<String>("user:1", "name").unwrap().as_deref(), Some("ada"));
        let before = dialer.command_count();
        assert_eq!(cache.hget::<String>("user:1", "lang").unwrap().as_deref(), Some("en"));
        assert_eq!(dialer.command_count(), before);
        assert_eq!(cache.hget::<String>("user:1", "missing").unwrap(), None);
    }

    #[test]
    fn test_empty_set_is_not_snapshotted() {
        let (cache, _) = cache();
        assert!(cache.smembers::<String>("tags").unwrap().is_empty());
        assert!(!cache.local().get("tags").is_present());
        cache.sadd("tags", &["a", "b"]).unwrap();
        assert_eq!(cache.smembers::<String>("tags").unwrap(), vec!["a", "b"]);
        assert!(cache.local().get("tags").is_present());
    }

    #[test]
    fn test_push_invalidates_and_range_reads_remote() {
        let (cache, _) = cache();
        cache.rpush("events", &[1, 2, 3]).unwrap();
        assert_eq!(cache.rpush_expiring("events", &[4], Duration::from_secs(30)).unwrap(), 4);
        assert_eq!(cache.lrange::<i64>("events", 0, -1).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(cache.lpop::<i64>("events").unwrap(), Some(1));
        assert_eq!(cache.llen("events").unwrap(), 3);
    }
}
