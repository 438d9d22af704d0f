//! Bounded connection pool.
//!
//! One pool per node. Links are created on demand up to `max_total`; at most
//! `max_idle` are kept for reuse. A caller that finds the pool exhausted waits
//! up to `max_wait` for a link to be returned.
//!
//! A [`Lease`] returns its link on drop. A lease marked with
//! [`Lease::discard`] closes the link instead, so a connection whose protocol
//! state is unknown never goes back to the pool.

use super::link::{Dialer, Endpoint, Link, LinkError, LinkResult, LinkSettings};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pool limits.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_total: usize,
    pub max_idle: usize,
    pub max_wait: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_total: 100,
            max_idle: 50,
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub total: usize,
    pub created: u64,
    pub discarded: u64,
}

struct PoolState {
    idle: VecDeque<Box<dyn Link>>,
    total: usize,
    closed: bool,
}

/// A bounded pool of links to one node.
pub struct Pool {
    endpoint: Endpoint,
    settings: PoolSettings,
    link_settings: LinkSettings,
    dialer: Arc<dyn Dialer>,
    state: Mutex<PoolState>,
    available: Condvar,
    created: AtomicU64,
    discarded: AtomicU64,
}

impl Pool {
    /// Create an empty pool. Nothing is dialed until the first lease.
    pub fn new(
        endpoint: Endpoint,
        dialer: Arc<dyn Dialer>,
        link_settings: LinkSettings,
        settings: PoolSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            settings,
            link_settings,
            dialer,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                closed: false,
            }),
            available: Condvar::new(),
            created: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Lease a link, dialing a new one when none is idle and the pool has
    /// room, otherwise waiting up to `max_wait`.
    pub fn lease(self: &Arc<Self>) -> LinkResult<Lease> {
        let deadline = Instant::now() + self.settings.max_wait;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(LinkError::Closed(self.endpoint.clone()));
            }
            if let Some(link) = state.idle.pop_back() {
                return Ok(Lease::new(Arc::clone(self), link));
            }
            if state.total < self.settings.max_total {
                state.total += 1;
                drop(state);
                return self.dial();
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(LinkError::PoolExhausted {
                    endpoint: self.endpoint.clone(),
                    waited: self.settings.max_wait,
                });
            }
        }
    }

    fn dial(self: &Arc<Self>) -> LinkResult<Lease> {
        match self.dialer.dial(&self.endpoint, &self.link_settings) {
            Ok(link) => {
                let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(endpoint = %self.endpoint, created, "pool grew");
                Ok(Lease::new(Arc::clone(self), link))
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.total -= 1;
                self.available.notify_one();
                Err(e)
            }
        }
    }

    fn release(&self, link: Box<dyn Link>, discard: bool) {
        let mut state = self.state.lock();
        if discard || state.closed || state.idle.len() >= self.settings.max_idle {
            state.total -= 1;
            if discard {
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
            drop(state);
            drop(link);
        } else {
            state.idle.push_back(link);
        }
        self.available.notify_one();
    }

    /// Close the pool: idle links are dropped now, leased links when they
    /// come back. Later leases fail.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let idle = state.idle.len();
        state.idle.clear();
        state.total -= idle;
        self.available.notify_all();
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            total: state.total,
            created: self.created.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("endpoint", &self.endpoint)
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusive use of one pooled link until dropped.
pub struct Lease {
    pool: Arc<Pool>,
    link: Option<Box<dyn Link>>,
    discard: bool,
}

impl Lease {
    fn new(pool: Arc<Pool>, link: Box<dyn Link>) -> Self {
        Self {
            pool,
            link: Some(link),
            discard: false,
        }
    }

    /// The leased link.
    pub fn link(&mut self) -> &mut dyn Link {
        match self.link.as_deref_mut() {
            Some(link) => link,
            None => unreachable!("lease used after release"),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.pool.endpoint()
    }

    /// Close the link on release instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", self.pool.endpoint())
            .field("discard", &self.discard)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            self.pool.release(link, self.discard);
        }
    }
}
