//! Primary/replica connector with discovery-driven failover.
//!
//! The primary's address is not configured; it is asked of the discovery
//! (sentinel) endpoints with `SENTINEL get-master-addr-by-name <name>`. The
//! answer given by a majority of the responding endpoints wins; without a
//! majority the most common answer is used, earliest first on ties.
//!
//! Discovery runs lazily on first lease and again after any failure that
//! suggests the primary moved (connection errors, `READONLY` replies). When
//! the answer changes, the old pool is closed and a new one is opened against
//! the new primary.

use super::link::{Dialer, Endpoint, LinkError, LinkResult, LinkSettings};
use super::pool::{Lease, Pool, PoolSettings, PoolStats};
use crate::protocol::{Command, RedisValue};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connector that follows the current primary.
pub struct Replicated {
    sentinels: Vec<Endpoint>,
    master_name: String,
    dialer: Arc<dyn Dialer>,
    link_settings: LinkSettings,
    pool_settings: PoolSettings,
    primary: RwLock<Option<Arc<Pool>>>,
    stale: AtomicBool,
}

impl Replicated {
    pub fn new(
        sentinels: Vec<Endpoint>,
        master_name: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        link_settings: LinkSettings,
        pool_settings: PoolSettings,
    ) -> Self {
        Self {
            sentinels,
            master_name: master_name.into(),
            dialer,
            link_settings,
            pool_settings,
            primary: RwLock::new(None),
            stale: AtomicBool::new(true),
        }
    }

    /// Lease a link to the current primary, discovering it first when
    /// unknown or marked stale.
    pub fn lease(&self) -> LinkResult<Lease> {
        self.primary_pool()?.lease()
    }

    /// Current primary, if discovered.
    pub fn primary(&self) -> Option<Endpoint> {
        self.primary.read().as_ref().map(|pool| pool.endpoint().clone())
    }

    /// Force rediscovery before the next lease.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn stats(&self) -> Option<PoolStats> {
        self.primary.read().as_ref().map(|pool| pool.stats())
    }

    fn primary_pool(&self) -> LinkResult<Arc<Pool>> {
        if !self.stale.load(Ordering::Acquire) {
            if let Some(pool) = self.primary.read().as_ref() {
                return Ok(Arc::clone(pool));
            }
        }
        self.refresh()
    }

    fn refresh(&self) -> LinkResult<Arc<Pool>> {
        let discovered = self.discover()?;
        let mut primary = self.primary.write();
        if let Some(pool) = primary.as_ref() {
            if pool.endpoint() == &discovered {
                self.stale.store(false, Ordering::Release);
                return Ok(Arc::clone(pool));
            }
            tracing::warn!(
                master = %self.master_name,
                from = %pool.endpoint(),
                to = %discovered,
                "primary changed, switching pool"
            );
            pool.close();
        } else {
            tracing::info!(master = %self.master_name, primary = %discovered, "primary discovered");
        }
        let pool = Pool::new(
            discovered,
            Arc::clone(&self.dialer),
            self.link_settings.clone(),
            self.pool_settings.clone(),
        );
        *primary = Some(Arc::clone(&pool));
        self.stale.store(false, Ordering::Release);
        Ok(pool)
    }

    /// Ask every discovery endpoint for the primary and settle on one answer.
    pub fn discover(&self) -> LinkResult<Endpoint> {
        let settings = self.link_settings.discovery();
        let query = Command::new("SENTINEL")
            .arg("get-master-addr-by-name")
            .arg(&self.master_name);

        let mut answers: Vec<Endpoint> = Vec::new();
        for sentinel in &self.sentinels {
            let answer = self
                .dialer
                .dial(sentinel, &settings)
                .and_then(|mut link| link.request(&query))
                .and_then(parse_address);
            match answer {
                Ok(Some(endpoint)) => answers.push(endpoint),
                Ok(None) => {
                    tracing::debug!(sentinel = %sentinel, master = %self.master_name, "sentinel does not know master")
                }
                Err(e) => tracing::warn!(sentinel = %sentinel, error = %e, "sentinel unreachable"),
            }
        }

        elect(&answers).ok_or_else(|| {
            LinkError::Discovery(format!(
                "no sentinel of {} reported a primary for '{}'",
                self.sentinels.len(),
                self.master_name
            ))
        })
    }
}

impl std::fmt::Debug for Replicated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replicated")
            .field("sentinels", &self.sentinels)
            .field("master_name", &self.master_name)
            .field("primary", &self.primary())
            .finish()
    }
}

fn parse_address(reply: RedisValue) -> LinkResult<Option<Endpoint>> {
    if reply.is_null() {
        return Ok(None);
    }
    let parts = reply
        .as_array()
        .filter(|parts| parts.len() == 2)
        .ok_or_else(|| LinkError::unexpected("[host, port]", &reply))?;
    let host = parts[0]
        .as_str()
        .ok_or_else(|| LinkError::unexpected("host", &parts[0]))?;
    let port = parts[1]
        .as_int()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| LinkError::unexpected("port", &parts[1]))?;
    Ok(Some(Endpoint::new(host, port)))
}

/// Majority answer, else the most common one (earliest wins ties).
fn elect(answers: &[Endpoint]) -> Option<Endpoint> {
    let mut tally: Vec<(&Endpoint, usize)> = Vec::new();
    for answer in answers {
        match tally.iter_mut().find(|(endpoint, _)| *endpoint == answer) {
            Some((_, count)) => *count += 1,
            None => tally.push((answer, 1)),
        }
    }
    if let Some((endpoint, _)) = tally.iter().find(|(_, count)| count * 2 > answers.len()) {
        return Some((*endpoint).clone());
    }
    let best = tally.iter().map(|(_, count)| *count).max()?;
    tally
        .into_iter()
        .find(|(_, count)| *count == best)
        .map(|(endpoint, _)| endpoint.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    #[test]
    fn test_elect_majority() {
        assert_eq!(elect(&[ep(1), ep(2), ep(2)]), Some(ep(2)));
    }

    #[test]
    fn test_elect_without_majority_prefers_first_most_common() {
        assert_eq!(elect(&[ep(1), ep(2)]), Some(ep(1)));
        assert_eq!(elect(&[ep(3), ep(1), ep(2), ep(1), ep(2), ep(4)]), Some(ep(1)));
        assert_eq!(elect(&[]), None);
    }

    #[test]
    fn test_parse_address() {
        let reply = RedisValue::array(vec![
            RedisValue::bulk_string("10.0.0.9"),
            RedisValue::bulk_string("6380"),
        ]);
        assert_eq!(
            parse_address(reply).unwrap(),
            Some(Endpoint::new("10.0.0.9", 6380))
        );
        assert_eq!(parse_address(RedisValue::Null).unwrap(), None);
        assert!(parse_address(RedisValue::integer(1)).is_err());
    }
}
