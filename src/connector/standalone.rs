//! Single-node connector.

use super::link::{Dialer, Endpoint, LinkResult, LinkSettings};
use super::pool::{Lease, Pool, PoolSettings, PoolStats};
use std::sync::Arc;

/// One node behind one bounded pool.
#[derive(Debug)]
pub struct Standalone {
    pool: Arc<Pool>,
}

impl Standalone {
    pub fn new(
        endpoint: Endpoint,
        dialer: Arc<dyn Dialer>,
        link_settings: LinkSettings,
        pool_settings: PoolSettings,
    ) -> Self {
        Self {
            pool: Pool::new(endpoint, dialer, link_settings, pool_settings),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.pool.endpoint()
    }

    pub fn lease(&self) -> LinkResult<Lease> {
        self.pool.lease()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
