//! Server-side cluster connector.
//!
//! Routing follows the store's own protocol: the slot table is loaded from
//! `CLUSTER SLOTS` on first use, a key goes to the owner of its slot, and
//! `MOVED` replies update the table. `ASK` redirects are followed by the
//! dispatch layer without touching the table. Any connection failure drops
//! the table so the next operation reloads it.

use super::link::{Dialer, Endpoint, LinkError, LinkResult, LinkSettings, Redirect, RedirectKind};
use super::pool::{Lease, Pool, PoolSettings};
use super::routing::{key_slot, SLOT_COUNT};
use crate::protocol::{Command, RedisValue};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Slot owners as last reported by the cluster.
#[derive(Debug, Clone)]
struct SlotTable {
    owners: Vec<Option<usize>>,
    nodes: Vec<Endpoint>,
}

impl SlotTable {
    /// Parse a `CLUSTER SLOTS` reply. An empty host means "the node you
    /// asked".
    fn from_reply(reply: RedisValue, queried: &Endpoint) -> LinkResult<Self> {
        let ranges = reply
            .into_array()
            .ok_or_else(|| LinkError::Protocol("CLUSTER SLOTS reply is not an array".into()))?;
        let mut table = Self {
            owners: vec![None; SLOT_COUNT as usize],
            nodes: Vec::new(),
        };
        for range in ranges {
            let range = range
                .into_array()
                .filter(|r| r.len() >= 3)
                .ok_or_else(|| LinkError::Protocol("malformed CLUSTER SLOTS range".into()))?;
            let start = slot_bound(&range[0])?;
            let end = slot_bound(&range[1])?;
            let master = range[2]
                .as_array()
                .filter(|m| m.len() >= 2)
                .ok_or_else(|| LinkError::unexpected("[host, port, ...]", &range[2]))?;
            let host = match master[0].as_str() {
                Some("") | None => queried.host.clone(),
                Some(host) => host.to_string(),
            };
            let port = master[1]
                .as_int()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| LinkError::unexpected("port", &master[1]))?;
            let node = table.node_index(Endpoint::new(host, port));
            for slot in start..=end {
                table.owners[slot as usize] = Some(node);
            }
        }
        Ok(table)
    }

    fn node_index(&mut self, endpoint: Endpoint) -> usize {
        match self.nodes.iter().position(|n| n == &endpoint) {
            Some(index) => index,
            None => {
                self.nodes.push(endpoint);
                self.nodes.len() - 1
            }
        }
    }

    fn owner(&self, slot: u16) -> Option<&Endpoint> {
        self.owners
            .get(slot as usize)
            .copied()
            .flatten()
            .map(|index| &self.nodes[index])
    }

    fn assign(&mut self, slot: u16, endpoint: Endpoint) {
        let node = self.node_index(endpoint);
        if let Some(owner) = self.owners.get_mut(slot as usize) {
            *owner = Some(node);
        }
    }

    /// Nodes owning at least one slot, in discovery order.
    fn masters(&self) -> Vec<Endpoint> {
        let mut owning = vec![false; self.nodes.len()];
        for index in self.owners.iter().flatten() {
            owning[*index] = true;
        }
        self.nodes
            .iter()
            .zip(owning)
            .filter_map(|(node, owns)| owns.then(|| node.clone()))
            .collect()
    }
}

fn slot_bound(value: &RedisValue) -> LinkResult<u16> {
    value
        .as_int()
        .and_then(|n| u16::try_from(n).ok())
        .filter(|n| *n < SLOT_COUNT)
        .ok_or_else(|| LinkError::unexpected("slot number", value))
}

/// Connector for a server-side cluster.
pub struct Clustered {
    seeds: Vec<Endpoint>,
    dialer: Arc<dyn Dialer>,
    link_settings: LinkSettings,
    pool_settings: PoolSettings,
    slots: RwLock<Option<SlotTable>>,
    pools: RwLock<HashMap<Endpoint, Arc<Pool>>>,
}

impl Clustered {
    pub fn new(
        seeds: Vec<Endpoint>,
        dialer: Arc<dyn Dialer>,
        link_settings: LinkSettings,
        pool_settings: PoolSettings,
    ) -> Self {
        Self {
            seeds,
            dialer,
            link_settings,
            pool_settings,
            slots: RwLock::new(None),
            pools: RwLock::new(HashMap::new()),
        }
    }

    fn pool_for(&self, endpoint: &Endpoint) -> Arc<Pool> {
        if let Some(pool) = self.pools.read().get(endpoint) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write();
        let pool = pools.entry(endpoint.clone()).or_insert_with(|| {
            Pool::new(
                endpoint.clone(),
                Arc::clone(&self.dialer),
                self.link_settings.clone(),
                self.pool_settings.clone(),
            )
        });
        Arc::clone(pool)
    }

    /// Lease a link to a specific node.
    pub fn lease_endpoint(&self, endpoint: &Endpoint) -> LinkResult<Lease> {
        self.pool_for(endpoint).lease()
    }

    /// Lease a link to the owner of `key`'s slot.
    pub fn lease_key(&self, key: &str) -> LinkResult<Lease> {
        let endpoint = self.endpoint_for_key(key)?;
        self.lease_endpoint(&endpoint)
    }

    /// Lease a link to any reachable master.
    pub fn lease_any(&self) -> LinkResult<Lease> {
        let endpoint = self
            .masters()?
            .into_iter()
            .next()
            .or_else(|| self.seeds.first().cloned())
            .ok_or_else(|| LinkError::Discovery("cluster has no known nodes".into()))?;
        self.lease_endpoint(&endpoint)
    }

    /// Node currently believed to own `key`. Unowned slots fall back to a
    /// seed, which will answer with a redirect.
    pub fn endpoint_for_key(&self, key: &str) -> LinkResult<Endpoint> {
        let slot = key_slot(key);
        self.ensure_slots()?;
        let owner = self
            .slots
            .read()
            .as_ref()
            .and_then(|table| table.owner(slot).cloned());
        owner
            .or_else(|| self.seeds.first().cloned())
            .ok_or_else(|| LinkError::Discovery(format!("no node owns slot {}", slot)))
    }

    /// Every node owning slots.
    pub fn masters(&self) -> LinkResult<Vec<Endpoint>> {
        self.ensure_slots()?;
        Ok(self
            .slots
            .read()
            .as_ref()
            .map(SlotTable::masters)
            .unwrap_or_default())
    }

    /// Apply a redirect to the slot table.
    pub fn learn(&self, redirect: &Redirect) {
        if redirect.kind != RedirectKind::Moved {
            return;
        }
        if let Some(table) = self.slots.write().as_mut() {
            tracing::debug!(slot = redirect.slot, owner = %redirect.endpoint, "slot moved");
            table.assign(redirect.slot, redirect.endpoint.clone());
        }
    }

    /// Forget the slot table; the next operation reloads it.
    pub fn invalidate(&self) {
        if self.slots.write().take().is_some() {
            tracing::debug!("slot table dropped");
        }
    }

    fn ensure_slots(&self) -> LinkResult<()> {
        if self.slots.read().is_some() {
            return Ok(());
        }
        self.load_slots()
    }

    fn load_slots(&self) -> LinkResult<()> {
        let mut candidates = self.seeds.clone();
        let mut known: Vec<Endpoint> = self.pools.read().keys().cloned().collect();
        known.sort();
        for endpoint in known {
            if !candidates.contains(&endpoint) {
                candidates.push(endpoint);
            }
        }

        let query = Command::new("CLUSTER").arg("SLOTS");
        let mut last_error = None;
        for endpoint in &candidates {
            let attempt = self.lease_endpoint(endpoint).and_then(|mut lease| {
                let reply = lease.link().request(&query);
                if matches!(&reply, Err(e) if e.poisons_link()) {
                    lease.discard();
                }
                SlotTable::from_reply(reply?, endpoint)
            });
            match attempt {
                Ok(table) => {
                    tracing::info!(
                        source = %endpoint,
                        masters = table.masters().len(),
                        "cluster slot table loaded"
                    );
                    *self.slots.write() = Some(table);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(node = %endpoint, error = %e, "cluster slot query failed");
                    last_error = Some(e);
                }
            }
        }
        Err(LinkError::Discovery(match last_error {
            Some(e) => format!("could not load cluster slots: {}", e),
            None => "cluster has no seed nodes".to_string(),
        }))
    }
}

impl std::fmt::Debug for Clustered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clustered")
            .field("seeds", &self.seeds)
            .field("loaded", &self.slots.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots_reply() -> RedisValue {
        let node = |host: &str, port: i64| {
            RedisValue::array(vec![
                RedisValue::bulk_string(host),
                RedisValue::integer(port),
                RedisValue::bulk_string("id"),
            ])
        };
        RedisValue::array(vec![
            RedisValue::array(vec![
                RedisValue::integer(0),
                RedisValue::integer(8191),
                node("10.0.0.1", 7000),
                node("10.0.0.4", 7003),
            ]),
            RedisValue::array(vec![
                RedisValue::integer(8192),
                RedisValue::integer(16383),
                node("", 7001),
            ]),
        ])
    }

    #[test]
    fn test_slot_table_from_reply() {
        let queried = Endpoint::new("10.0.0.2", 7001);
        let table = SlotTable::from_reply(slots_reply(), &queried).unwrap();
        assert_eq!(table.owner(0), Some(&Endpoint::new("10.0.0.1", 7000)));
        assert_eq!(table.owner(16383), Some(&queried));
        assert_eq!(table.masters().len(), 2);
    }

    #[test]
    fn test_slot_table_assign() {
        let queried = Endpoint::new("10.0.0.2", 7001);
        let mut table = SlotTable::from_reply(slots_reply(), &queried).unwrap();
        let target = Endpoint::new("10.0.0.3", 7002);
        table.assign(5, target.clone());
        assert_eq!(table.owner(5), Some(&target));
        assert_eq!(table.masters().len(), 3);
    }

    #[test]
    fn test_slot_table_rejects_garbage() {
        let queried = Endpoint::new("10.0.0.2", 7001);
        assert!(SlotTable::from_reply(RedisValue::integer(1), &queried).is_err());
        let bad = RedisValue::array(vec![RedisValue::array(vec![
            RedisValue::integer(0),
            RedisValue::integer(20000),
            RedisValue::array(vec![RedisValue::bulk_string("h"), RedisValue::integer(1)]),
        ])]);
        assert!(SlotTable::from_reply(bad, &queried).is_err());
    }
}
