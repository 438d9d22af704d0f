//! Command dispatch.
//!
//! [`Remote`] wraps a [`Connector`] with the lease/run/release contract every
//! remote operation goes through:
//!
//! 1. arguments are validated (`Precondition`),
//! 2. the capability matrix is consulted (`UnsupportedForTopology`),
//! 3. an unconfigured connector fails (`Configuration`),
//! 4. a link is leased, the operation runs, the lease is released.
//!
//! Steps 1-3 never touch the network. A link that failed mid-operation is
//! discarded instead of returned to its pool. Cluster redirects are followed
//! here, up to [`MAX_ATTEMPTS`] per operation.
//!
//! # Operation classes
//!
//! | Class | Operations |
//! |-------|------------|
//! | Single key | GET, SET, INCRBY, HSET, LPUSH, SADD, ZADD, SETBIT, ... |
//! | Keyless | PING |
//! | Key listing | KEYS, SCAN |
//! | Rename | RENAME, RENAMENX |
//! | Multi-key | RPOPLPUSH, SMOVE, BITOP, PFCOUNT (several keys), MGET/MSET/DEL (unpartitioned) |
//! | Scripting | EVAL |
//! | Pipeline | [`Pipeline`] batches |

pub mod bits;
pub mod hashes;
pub mod keys;
pub mod lists;
pub mod pipeline;
pub mod reply;
pub mod scripting;
pub mod sets;
pub mod strings;
pub mod zsets;

pub use bits::BitOp;
pub use pipeline::Pipeline;

use crate::connector::{
    Connector, Link, LinkError, LinkResult, Op, Redirect, RedirectKind, Route,
    Topology,
};
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::{Command, RedisValue};
use std::sync::Arc;

/// Redirects followed per operation, counting the first attempt.
pub const MAX_ATTEMPTS: usize = 5;

/// The primitive remote operation set over one connector.
#[derive(Debug, Clone)]
pub struct Remote {
    connector: Arc<Connector>,
}

impl Remote {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn topology(&self) -> Option<Topology> {
        self.connector.topology()
    }

    /// Check if keys may live on different nodes.
    pub fn is_partitioned(&self) -> bool {
        self.topology().is_some_and(|t| t.is_partitioned())
    }

    /// Run the pre-dispatch checks for `op` without leasing anything.
    pub fn admit(&self, op: &Op<'_>) -> TrellisResult<()> {
        self.connector.check(op)?;
        self.connector.ready()
    }

    /// Lease a link for `op`, run `f` on it and release it.
    ///
    /// `f` may be called again on another node after a cluster redirect, so
    /// it must be safe to repeat.
    pub fn execute<T, F>(&self, op: &Op<'_>, f: F) -> TrellisResult<T>
    where
        F: FnMut(&mut dyn Link) -> LinkResult<T>,
    {
        self.admit(op)?;
        let route = match op.routing_key() {
            Some(key) => Route::Key(key),
            None => Route::Any,
        };
        self.execute_routed(op.name, route, f)
    }

    /// [`execute`](Self::execute) for side-effect-only operations.
    pub fn execute_void<F>(&self, op: &Op<'_>, f: F) -> TrellisResult<()>
    where
        F: FnMut(&mut dyn Link) -> LinkResult<()>,
    {
        self.execute(op, f)
    }

    /// Send one command for `op` and convert its reply.
    pub(crate) fn call<T>(
        &self,
        op: Op<'_>,
        command: Command,
        parse: impl Fn(RedisValue) -> LinkResult<T>,
    ) -> TrellisResult<T> {
        self.execute(&op, |link| parse(link.request(&command)?))
    }

    /// Run `f` against the node behind `route`, following redirects. Checks
    /// must already have passed.
    pub(crate) fn execute_routed<T, F>(
        &self,
        name: &str,
        mut route: Route<'_>,
        mut f: F,
    ) -> TrellisResult<T>
    where
        F: FnMut(&mut dyn Link) -> LinkResult<T>,
    {
        let clustered = matches!(*self.connector, Connector::Clustered(_));
        let mut attempt = 1;
        loop {
            let mut lease = self
                .connector
                .lease(&route)
                .map_err(|e| self.fail(name, e))?;

            let result = match route {
                Route::Asking(_) => lease
                    .link()
                    .request(&Command::new("ASKING"))
                    .and_then(|_| f(lease.link())),
                _ => f(lease.link()),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(LinkError::Redirect(redirect)) if clustered && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(command = name, redirect = %redirect, attempt, "following redirect");
                    drop(lease);
                    route = self.follow(&redirect);
                    attempt += 1;
                }
                Err(e) => {
                    if e.poisons_link() {
                        lease.discard();
                    }
                    drop(lease);
                    return Err(self.fail(name, e));
                }
            }
        }
    }

    fn follow(&self, redirect: &Redirect) -> Route<'static> {
        self.connector.on_redirect(redirect);
        match redirect.kind {
            RedirectKind::Moved => Route::Node(redirect.endpoint.clone()),
            RedirectKind::Ask => Route::Asking(redirect.endpoint.clone()),
        }
    }

    fn fail(&self, name: &str, error: LinkError) -> TrellisError {
        if error.unsettles_topology() {
            self.connector.on_failure(&error);
        }
        TrellisError::dispatch(name, error)
    }
}

/// Reject an empty key.
pub(crate) fn require_key(key: &str) -> TrellisResult<()> {
    if key.is_empty() {
        return Err(TrellisError::precondition("key must not be empty"));
    }
    Ok(())
}

/// Reject an empty key list or any empty key in it.
pub(crate) fn require_keys(keys: &[&str]) -> TrellisResult<()> {
    if keys.is_empty() {
        return Err(TrellisError::precondition("at least one key is required"));
    }
    keys.iter().try_for_each(|key| require_key(key))
}

/// Reject an empty argument list.
pub(crate) fn require_items<T>(what: &str, items: &[T]) -> TrellisResult<()> {
    if items.is_empty() {
        return Err(TrellisError::precondition(format!(
            "at least one {} is required",
            what
        )));
    }
    Ok(())
}

/// Reject a zero duration or size.
pub(crate) fn require_positive(what: &str, value: u64) -> TrellisResult<()> {
    if value == 0 {
        return Err(TrellisError::precondition(format!(
            "{} must be greater than zero",
            what
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{CommandClass, Endpoint, MemoryDialer};
    use crate::core::config::TopologyConfig;

    fn clustered(dialer: &MemoryDialer) -> Remote {
        let config = TopologyConfig::new(Topology::Clustered, ["10.0.0.1:7000"]);
        Remote::new(Connector::new(&config, Arc::new(dialer.clone())))
    }

    #[test]
    fn test_precondition_before_capability() {
        let config = TopologyConfig::new(Topology::Sharded, ["a:1", "b:1"]);
        let dialer = MemoryDialer::new();
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));
        assert!(matches!(
            remote.rename("", "b"),
            Err(TrellisError::Precondition { .. })
        ));
        assert!(matches!(
            remote.rename("a", "b"),
            Err(TrellisError::UnsupportedForTopology { .. })
        ));
        assert_eq!(dialer.dial_count(), 0);
    }

    #[test]
    fn test_moved_is_followed_and_learned() {
        let a = Endpoint::new("10.0.0.1", 7000);
        let b = Endpoint::new("10.0.0.2", 7000);
        let dialer = MemoryDialer::new().with_cluster([(0..=16383, a.clone())]);
        let remote = clustered(&dialer);

        remote.set("foo", "1").unwrap();
        dialer.assign_slots(12182..=12182, b.clone());
        remote.set("foo", "2").unwrap();
        assert_eq!(dialer.store(&b).get("foo").as_deref(), Some(&b"2"[..]));

        let before = dialer.command_count();
        assert_eq!(remote.get("foo").unwrap().as_deref(), Some(&b"2"[..]));
        // Table already points at b: one command, no redirect.
        assert_eq!(dialer.command_count() - before, 1);
    }

    #[test]
    fn test_redirect_loop_gives_up() {
        let a = Endpoint::new("10.0.0.1", 7000);
        let dialer = MemoryDialer::new().with_cluster([(0..=16383, a)]);
        let remote = clustered(&dialer);
        let op = Op::keyed("GET", "foo");
        let mut calls = 0;
        let result: TrellisResult<()> = remote.execute(&op, |_| {
            calls += 1;
            Err(LinkError::Redirect(Redirect {
                kind: RedirectKind::Ask,
                slot: 12182,
                endpoint: Endpoint::new("10.0.0.1", 7000),
            }))
        });
        assert!(matches!(
            result,
            Err(TrellisError::Dispatch {
                source: LinkError::Redirect(_),
                ..
            })
        ));
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[test]
    fn test_failed_link_is_discarded() {
        let config = TopologyConfig::new(Topology::Standalone, ["10.0.0.9:6379"]);
        let dialer = MemoryDialer::new();
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));
        remote.ping().unwrap();
        let dials = dialer.dial_count();

        let op = Op::new("PING", CommandClass::Keyless, vec![]);
        let result: TrellisResult<()> =
            remote.execute(&op, |_| Err(LinkError::Protocol("garbled".into())));
        assert!(result.is_err());

        remote.ping().unwrap();
        assert_eq!(dialer.dial_count(), dials + 1);
    }

    #[test]
    fn test_error_reply_keeps_link() {
        let config = TopologyConfig::new(Topology::Standalone, ["10.0.0.9:6379"]);
        let dialer = MemoryDialer::new();
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));
        remote.lpush("list", &["a"]).unwrap();
        let err = remote.get("list").unwrap_err();
        assert!(!err.is_retriable());
        remote.ping().unwrap();
        assert_eq!(dialer.dial_count(), 1);
    }
}
