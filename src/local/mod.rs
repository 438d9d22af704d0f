//! Process-local cache tier.
//!
//! A bounded concurrent map in front of the remote store. Entries expire
//! under their own policy (time since write, time since last read, and
//! size-bounded eviction weighing recency and frequency), independent of any
//! TTL the remote key carries.
//!
//! Absence is never stored. [`Lookup::Absent`] exists only as a lookup
//! result, [`LocalTier::put`] accepts a [`Cached`] value, and [`Cached`]
//! refuses to build an empty hash or member snapshot.

use crate::core::config::LocalTierConfig;
use bytes::Bytes;
use moka::sync::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A value held by the local tier.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached {
    /// A string value in its serialized form.
    Scalar(Bytes),
    /// Every field of a hash.
    Hash(Arc<BTreeMap<String, Bytes>>),
    /// Every member of a set.
    Members(Arc<Vec<Bytes>>),
}

impl Cached {
    pub fn scalar(value: impl Into<Bytes>) -> Self {
        Self::Scalar(value.into())
    }

    /// A hash snapshot, or `None` for an empty hash.
    pub fn hash(fields: BTreeMap<String, Bytes>) -> Option<Self> {
        (!fields.is_empty()).then(|| Self::Hash(Arc::new(fields)))
    }

    /// A member snapshot, or `None` for an empty set.
    pub fn members(members: Vec<Bytes>) -> Option<Self> {
        (!members.is_empty()).then(|| Self::Members(Arc::new(members)))
    }
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Present(T),
    Absent,
}

impl<T> Lookup<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Present(value),
            None => Self::Absent,
        }
    }
}

/// The local tier. A disabled tier answers every lookup with
/// [`Lookup::Absent`] and ignores writes.
#[derive(Clone)]
pub struct LocalTier {
    cache: Option<Cache<String, Cached>>,
}

impl LocalTier {
    pub fn new(config: &LocalTierConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let mut builder = Cache::builder()
            .initial_capacity(config.initial_capacity)
            .max_capacity(config.max_capacity);
        if config.expire_after_write_secs > 0 {
            builder = builder.time_to_live(Duration::from_secs(config.expire_after_write_secs));
        }
        if config.expire_after_access_secs > 0 {
            builder = builder.time_to_idle(Duration::from_secs(config.expire_after_access_secs));
        }
        Self {
            cache: Some(builder.build()),
        }
    }

    pub fn disabled() -> Self {
        Self { cache: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn get(&self, key: &str) -> Lookup<Cached> {
        self.cache.as_ref().and_then(|cache| cache.get(key)).into()
    }

    pub fn put(&self, key: &str, value: Cached) {
        if let Some(cache) = &self.cache {
            cache.insert(key.to_string(), value);
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(key);
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    /// Return the cached entry, or run `loader` and cache what it finds.
    /// Nothing is cached when the loader reports [`Lookup::Absent`] or fails.
    pub fn get_or_load<E>(
        &self,
        key: &str,
        loader: impl FnOnce() -> Result<Lookup<Cached>, E>,
    ) -> Result<Lookup<Cached>, E> {
        if let Lookup::Present(hit) = self.get(key) {
            return Ok(Lookup::Present(hit));
        }
        let loaded = loader()?;
        if let Lookup::Present(value) = &loaded {
            self.put(key, value.clone());
        }
        Ok(loaded)
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        match &self.cache {
            Some(cache) => {
                cache.run_pending_tasks();
                cache.entry_count()
            }
            None => 0,
        }
    }
}

impl std::fmt::Debug for LocalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTier")
            .field("enabled", &self.is_enabled())
            .field("entries", &self.cache.as_ref().map(|c| c.entry_count()))
            .finish()
    }
}
