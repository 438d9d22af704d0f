//! Distributed mutual-exclusion lock.
//!
//! Acquisition is one `SET key token NX PX ttl`; its reply is the only
//! acquisition signal. Release runs [`RELEASE_SCRIPT`] so that a holder whose
//! lock already expired cannot delete a lock since taken by someone else.
//!
//! There is no retry or backoff here. A failed call (`Dispatch` error) means
//! the lock state is unknown, see [`TrellisError::is_state_unknown`].

use crate::connector::{CommandClass, Op};
use crate::core::error::{TrellisError, TrellisResult};
use crate::dispatch::scripting::eval_command;
use crate::dispatch::{reply, require_key, Remote};
use std::time::Duration;

/// Compare-and-delete. Returns 1 when the key held the token and was
/// deleted, 0 otherwise.
pub const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

/// Take the lock at `key` for `token`, expiring after `ttl`. Returns true if
/// this call took it.
pub fn acquire(remote: &Remote, key: &str, token: &str, ttl: Duration) -> TrellisResult<bool> {
    require_key(key)?;
    require_token(token)?;
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if ttl_ms == 0 {
        return Err(TrellisError::precondition("lock ttl must be at least 1ms"));
    }
    let taken = remote.set_nx_px(key, token, ttl_ms)?;
    tracing::debug!(key, taken, ttl_ms, "lock acquire");
    Ok(taken)
}

/// Release the lock at `key` if `token` still holds it. Returns true only
/// when this call deleted the key.
pub fn release(remote: &Remote, key: &str, token: &str) -> TrellisResult<bool> {
    require_key(key)?;
    require_token(token)?;
    // The script touches one key, so it routes like a single-key command.
    let released = remote.call(
        Op::new("EVAL", CommandClass::SingleKey, vec![key]),
        eval_command(RELEASE_SCRIPT, &[key], &[token]),
        |value| Ok(reply::integer(value)? == 1),
    )?;
    tracing::debug!(key, released, "lock release");
    Ok(released)
}

fn require_token(token: &str) -> TrellisResult<()> {
    if token.is_empty() {
        return Err(TrellisError::precondition("lock owner token must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, MemoryDialer, Topology};
    use crate::core::config::TopologyConfig;
    use std::sync::Arc;

    fn remote(topology: Topology, nodes: &[&str]) -> (Remote, MemoryDialer) {
        let dialer = MemoryDialer::new();
        let config = TopologyConfig::new(topology, nodes.iter().copied());
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));
        (remote, dialer)
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let (remote, _) = remote(Topology::Standalone, &["127.0.0.1"]);
        let ttl = Duration::from_secs(30);
        assert!(acquire(&remote, "job", "a", ttl).unwrap());
        assert!(!acquire(&remote, "job", "b", ttl).unwrap());
        assert!(release(&remote, "job", "a").unwrap());
        assert!(acquire(&remote, "job", "b", ttl).unwrap());
    }

    #[test]
    fn test_release_with_wrong_token_keeps_lock() {
        let (remote, _) = remote(Topology::Standalone, &["127.0.0.1"]);
        assert!(acquire(&remote, "job", "a", Duration::from_secs(30)).unwrap());
        assert!(!release(&remote, "job", "b").unwrap());
        assert_eq!(remote.get("job").unwrap().as_deref(), Some(&b"a"[..]));
    }

    #[test]
    fn test_release_works_on_sharded() {
        let (remote, _) = remote(Topology::Sharded, &["10.0.0.1:6379", "10.0.0.2:6379"]);
        assert!(acquire(&remote, "job", "a", Duration::from_secs(30)).unwrap());
        assert!(release(&remote, "job", "a").unwrap());
        assert!(!remote.exists("job").unwrap());
    }

    #[test]
    fn test_arguments_checked_before_dispatch() {
        let (remote, dialer) = remote(Topology::Standalone, &["127.0.0.1"]);
        for result in [
            acquire(&remote, "job", "", Duration::from_secs(1)),
            acquire(&remote, "job", "a", Duration::from_micros(10)),
            release(&remote, "", "a"),
        ] {
            assert!(matches!(result, Err(TrellisError::Precondition { .. })));
        }
        assert_eq!(dialer.dial_count(), 0);
    }
}
