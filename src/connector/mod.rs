//! Backend connectors.
//!
//! A [`Connector`] owns the pools and routing state for one deployment of
//! the remote store. The variant is chosen once, from configuration, and
//! every caller goes through the same capability-aware surface:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Connector                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  check(op)   capability matrix, no I/O                       │
//! │  lease(route)                                                │
//! │    ├── Standalone   one pool                                 │
//! │    ├── Replicated   pool for the discovered primary          │
//! │    ├── Sharded      pool per node, consistent-hash ring      │
//! │    └── Clustered    pool per node, slot table + redirects    │
//! │  Pool → Link (TcpLink, MemoryLink, ...)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Building a connector never touches the network. When the configuration is
//! incomplete the connector is left [`Connector::Unconfigured`] and the
//! first operation fails with a configuration error.

pub mod capabilities;
pub mod clustered;
pub mod link;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod pool;
pub mod replicated;
pub mod routing;
pub mod sharded;
pub mod standalone;

pub use capabilities::{Capability, CommandClass, Op, Topology};
pub use clustered::Clustered;
pub use link::{
    check_reply, handshake, Dialer, Endpoint, Link, LinkError, LinkResult, LinkSettings,
    Redirect, RedirectKind, TcpDialer, TcpLink,
};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryDialer, MemoryStore};
pub use pool::{Lease, Pool, PoolSettings, PoolStats};
pub use replicated::Replicated;
pub use routing::{key_slot, ShardRing};
pub use sharded::Sharded;
pub use standalone::Standalone;

use crate::core::config::TopologyConfig;
use crate::core::error::{TrellisError, TrellisResult};
use std::sync::Arc;

/// Where an operation should be sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route<'a> {
    /// Any node will do.
    Any,
    /// The node owning this key.
    Key(&'a str),
    /// A client-side shard by index.
    Shard(usize),
    /// A specific cluster node.
    Node(Endpoint),
    /// A cluster node mid-migration; send ASKING first.
    Asking(Endpoint),
}

/// A connector for one configured deployment.
#[derive(Debug)]
pub enum Connector {
    Standalone(Standalone),
    Replicated(Replicated),
    Sharded(Sharded),
    Clustered(Clustered),
    /// Configuration was missing or invalid; every operation fails.
    Unconfigured {
        topology: Option<Topology>,
        reason: String,
    },
}

impl Connector {
    /// Build a connector. Never fails: an unusable configuration is logged
    /// and produces [`Connector::Unconfigured`].
    pub fn new(config: &TopologyConfig, dialer: Arc<dyn Dialer>) -> Self {
        match Self::try_new(config, dialer) {
            Ok(connector) => connector,
            Err(e) => {
                tracing::error!(instance = %config.label(), error = %e, "connector left uninitialized");
                Self::Unconfigured {
                    topology: config.topology,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Build a connector, failing fast on an unusable configuration.
    pub fn try_new(config: &TopologyConfig, dialer: Arc<dyn Dialer>) -> TrellisResult<Self> {
        let (topology, endpoints) = config.check()?;
        let link_settings = config.link_settings();
        let pool_settings = config.pool_settings();
        let connector = match topology {
            Topology::Standalone => {
                let endpoint = endpoints
                    .into_iter()
                    .next()
                    .ok_or_else(|| TrellisError::configuration("standalone needs one node"))?;
                Self::Standalone(Standalone::new(endpoint, dialer, link_settings, pool_settings))
            }
            Topology::Replicated => Self::Replicated(Replicated::new(
                endpoints,
                config.master_name.clone(),
                dialer,
                link_settings,
                pool_settings,
            )),
            Topology::Sharded => {
                Self::Sharded(Sharded::new(endpoints, dialer, link_settings, pool_settings))
            }
            Topology::Clustered => {
                Self::Clustered(Clustered::new(endpoints, dialer, link_settings, pool_settings))
            }
        };
        tracing::info!(instance = %config.label(), topology = %topology, "connector built");
        Ok(connector)
    }

    /// The configured topology, if known.
    pub fn topology(&self) -> Option<Topology> {
        match self {
            Self::Standalone(_) => Some(Topology::Standalone),
            Self::Replicated(_) => Some(Topology::Replicated),
            Self::Sharded(_) => Some(Topology::Sharded),
            Self::Clustered(_) => Some(Topology::Clustered),
            Self::Unconfigured { topology, .. } => *topology,
        }
    }

    /// Fail with the stored configuration error if the connector is unusable.
    pub fn ready(&self) -> TrellisResult<()> {
        match self {
            Self::Unconfigured { reason, .. } => Err(TrellisError::configuration(reason.clone())),
            _ => Ok(()),
        }
    }

    /// Check `op` against the capability matrix. Pure; never touches the
    /// network.
    pub fn check(&self, op: &Op<'_>) -> TrellisResult<()> {
        let topology = match self.topology() {
            Some(topology) => topology,
            None => return Ok(()),
        };
        let unsupported = |reason: &str| TrellisError::unsupported(op.name, topology, reason);
        match topology.capability(op.class) {
            Capability::Supported | Capability::ClusterWide => Ok(()),
            Capability::Unsupported => Err(unsupported(op.reason())),
            Capability::SameShard => match self {
                Self::Sharded(sharded) => match sharded.common_shard(op.keys.iter().copied()) {
                    Some(_) => Ok(()),
                    None => Err(unsupported("keys map to different shards")),
                },
                _ => Ok(()),
            },
            Capability::SameSlot => match routing::common_slot(op.keys.iter().copied()) {
                Some(_) => Ok(()),
                None => Err(unsupported("keys hash to different slots")),
            },
        }
    }

    /// Lease a link for `route`.
    pub fn lease(&self, route: &Route<'_>) -> LinkResult<Lease> {
        match (self, route) {
            (Self::Standalone(standalone), _) => standalone.lease(),
            (Self::Replicated(replicated), _) => replicated.lease(),
            (Self::Sharded(sharded), Route::Key(key)) => sharded.lease(sharded.shard_for(key)),
            (Self::Sharded(sharded), Route::Shard(shard)) => sharded.lease(*shard),
            (Self::Sharded(sharded), _) => sharded.lease(0),
            (Self::Clustered(clustered), Route::Key(key)) => clustered.lease_key(key),
            (Self::Clustered(clustered), Route::Node(endpoint) | Route::Asking(endpoint)) => {
                clustered.lease_endpoint(endpoint)
            }
            (Self::Clustered(clustered), _) => clustered.lease_any(),
            (Self::Unconfigured { reason, .. }, _) => Err(LinkError::Discovery(reason.clone())),
        }
    }

    /// The node-level route `key` resolves to, used to group commands that
    /// can share a round trip.
    pub fn group_of(&self, key: Option<&str>) -> LinkResult<Route<'static>> {
        match (self, key) {
            (Self::Sharded(sharded), Some(key)) => Ok(Route::Shard(sharded.shard_for(key))),
            (Self::Clustered(clustered), Some(key)) => {
                Ok(Route::Node(clustered.endpoint_for_key(key)?))
            }
            _ => Ok(Route::Any),
        }
    }

    /// Every node a cluster-wide operation must visit.
    pub fn fan_out(&self) -> LinkResult<Vec<Route<'static>>> {
        match self {
            Self::Clustered(clustered) => {
                Ok(clustered.masters()?.into_iter().map(Route::Node).collect())
            }
            Self::Sharded(sharded) => Ok((0..sharded.shard_count()).map(Route::Shard).collect()),
            _ => Ok(vec![Route::Any]),
        }
    }

    /// Apply a cluster redirect.
    pub(crate) fn on_redirect(&self, redirect: &Redirect) {
        if let Self::Clustered(clustered) = self {
            clustered.learn(redirect);
        }
    }

    /// React to a failure that may mean the deployment changed shape.
    pub(crate) fn on_failure(&self, error: &LinkError) {
        match self {
            Self::Replicated(replicated) => {
                tracing::warn!(error = %error, "primary marked stale");
                replicated.mark_stale();
            }
            Self::Clustered(clustered) => clustered.invalidate(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingDialer;

    impl Dialer for RefusingDialer {
        fn dial(&self, endpoint: &Endpoint, _: &LinkSettings) -> LinkResult<Box<dyn Link>> {
            panic!("dialed {} during a check that must stay offline", endpoint);
        }
    }

    fn connector(topology: Topology, nodes: &[&str]) -> Connector {
        Connector::new(
            &TopologyConfig::new(topology, nodes.iter().copied()),
            Arc::new(RefusingDialer),
        )
    }

    #[test]
    fn test_missing_nodes_leave_connector_unconfigured() {
        let connector = connector(Topology::Standalone, &[]);
        assert!(matches!(connector, Connector::Unconfigured { .. }));
        assert!(matches!(
            connector.ready(),
            Err(TrellisError::Configuration { .. })
        ));
        assert_eq!(connector.topology(), Some(Topology::Standalone));
    }

    #[test]
    fn test_sharded_rejects_rename_and_listing() {
        let connector = connector(Topology::Sharded, &["10.0.0.1:7000", "10.0.0.2:7000"]);
        let rename = Op::new("RENAME", CommandClass::Rename, vec!["a", "b"]);
        let keys = Op::new("KEYS", CommandClass::KeyListing, vec![]);
        let eval = Op::new("EVAL", CommandClass::Scripting, vec!["a"]);
        for op in [rename, keys, eval] {
            assert!(matches!(
                connector.check(&op),
                Err(TrellisError::UnsupportedForTopology { .. })
            ));
        }
    }

    #[test]
    fn test_sharded_multi_key_needs_common_shard() {
        let connector = connector(
            Topology::Sharded,
            &["10.0.0.1:7000", "10.0.0.2:7000", "10.0.0.3:7000"],
        );
        let same = Op::new("RPOPLPUSH", CommandClass::MultiKey, vec!["{q}:a", "{q}:b"]);
        assert!(connector.check(&same).is_ok());

        let spread: Vec<String> = (0..32).map(|i| format!("k{}", i)).collect();
        let op = Op::new(
            "RPOPLPUSH",
            CommandClass::MultiKey,
            spread.iter().map(String::as_str).collect(),
        );
        assert!(connector.check(&op).is_err());
    }

    #[test]
    fn test_clustered_rename_needs_common_slot() {
        let connector = connector(Topology::Clustered, &["10.0.0.1:7000"]);
        let cross = Op::new("RENAME", CommandClass::Rename, vec!["foo", "bar"]);
        assert!(connector.check(&cross).is_err());
        let same = Op::new("RENAME", CommandClass::Rename, vec!["{u}:a", "{u}:b"]);
        assert!(connector.check(&same).is_ok());
        let listing = Op::new("KEYS", CommandClass::KeyListing, vec![]);
        assert!(connector.check(&listing).is_ok());
    }

    #[test]
    fn test_standalone_allows_everything() {
        let connector = connector(Topology::Standalone, &["127.0.0.1"]);
        let op = Op::new("EVAL", CommandClass::Scripting, vec!["a", "b"]);
        assert!(connector.check(&op).is_ok());
    }

    #[test]
    fn test_unconfigured_lease_fails_without_dialing() {
        let connector = connector(Topology::Clustered, &[]);
        assert!(connector.lease(&Route::Any).is_err());
    }
}
