//! Client-side sharded connector.
//!
//! Keys are mapped to nodes by [`ShardRing`]; the node list is fixed at
//! construction and never rebalanced. Operations that need a view of the
//! whole keyspace are rejected by the capability matrix before they get
//! here.

use super::link::{Dialer, Endpoint, LinkError, LinkResult, LinkSettings};
use super::pool::{Lease, Pool, PoolSettings, PoolStats};
use super::routing::ShardRing;
use std::sync::Arc;

/// Fixed set of independent nodes, one pool each.
#[derive(Debug)]
pub struct Sharded {
    ring: ShardRing,
    pools: Vec<Arc<Pool>>,
}

impl Sharded {
    pub fn new(
        endpoints: Vec<Endpoint>,
        dialer: Arc<dyn Dialer>,
        link_settings: LinkSettings,
        pool_settings: PoolSettings,
    ) -> Self {
        let ring = ShardRing::new(&endpoints);
        let pools = endpoints
            .into_iter()
            .map(|endpoint| {
                Pool::new(
                    endpoint,
                    Arc::clone(&dialer),
                    link_settings.clone(),
                    pool_settings.clone(),
                )
            })
            .collect();
        Self { ring, pools }
    }

    pub fn shard_count(&self) -> usize {
        self.pools.len()
    }

    pub fn shard_for(&self, key: &str) -> usize {
        self.ring.shard_for(key)
    }

    /// Shard shared by every key, if there is one.
    pub fn common_shard<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<usize> {
        self.ring.common_shard(keys)
    }

    pub fn endpoint(&self, shard: usize) -> Option<&Endpoint> {
        self.pools.get(shard).map(|pool| pool.endpoint())
    }

    pub fn lease(&self, shard: usize) -> LinkResult<Lease> {
        self.pools
            .get(shard)
            .ok_or_else(|| LinkError::Protocol(format!("no shard {}", shard)))?
            .lease()
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(|pool| pool.stats()).collect()
    }
}
