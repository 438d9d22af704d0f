//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use trellis::config::{BloomConfig, LocalTierConfig, TopologyConfig};
use trellis::connector::{
    Connector, Dialer, Endpoint, Link, LinkError, LinkResult, LinkSettings, MemoryDialer,
    Topology,
};
use trellis::protocol::{Command, RedisValue};
use trellis::{BloomFilter, LocalTier, Remote, TieredCache};

/// Write `content` to a temporary config file.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// A dialer that fails the test if anything tries to connect.
pub struct PanicDialer;

impl Dialer for PanicDialer {
    fn dial(&self, endpoint: &Endpoint, _settings: &LinkSettings) -> LinkResult<Box<dyn Link>> {
        panic!("unexpected connection to {}", endpoint);
    }
}

/// A remote over the in-process backend.
pub fn memory_remote(topology: Topology, nodes: &[&str], dialer: &MemoryDialer) -> Remote {
    let config = TopologyConfig::new(topology, nodes.iter().copied());
    Remote::new(Connector::new(&config, Arc::new(dialer.clone())))
}

/// A remote whose every connection attempt panics.
pub fn panicking_remote(topology: Topology, nodes: &[&str]) -> Remote {
    let config = TopologyConfig::new(topology, nodes.iter().copied());
    Remote::new(Connector::new(&config, Arc::new(PanicDialer)))
}

/// A standalone two-tier cache over the in-process backend.
pub fn standalone_cache() -> (TieredCache, MemoryDialer) {
    let dialer = MemoryDialer::new();
    let remote = memory_remote(Topology::Standalone, &["127.0.0.1:6379"], &dialer);
    (cache_over(remote, BloomConfig::default()), dialer)
}

/// A two-tier cache with default local settings over `remote`.
pub fn cache_over(remote: Remote, bloom: BloomConfig) -> TieredCache {
    let local = LocalTier::new(&LocalTierConfig::default());
    let bloom = BloomFilter::new(bloom).expect("valid bloom descriptor");
    TieredCache::new(remote, local, bloom)
}

/// The endpoint of the standalone node used by [`standalone_cache`].
pub fn standalone_endpoint() -> Endpoint {
    Endpoint::new("127.0.0.1", 6379)
}

/// A dialer over the in-process backend whose links, while `lose_replies`
/// is set, run every command and then time out instead of answering.
#[derive(Clone, Default)]
pub struct ReplyLossDialer {
    pub inner: MemoryDialer,
    pub lose_replies: Arc<AtomicBool>,
}

impl ReplyLossDialer {
    pub fn set_losing(&self, losing: bool) {
        self.lose_replies.store(losing, Ordering::SeqCst);
    }
}

impl Dialer for ReplyLossDialer {
    fn dial(&self, endpoint: &Endpoint, settings: &LinkSettings) -> LinkResult<Box<dyn Link>> {
        Ok(Box::new(ReplyLossLink {
            inner: self.inner.dial(endpoint, settings)?,
            lose_replies: Arc::clone(&self.lose_replies),
        }))
    }
}

struct ReplyLossLink {
    inner: Box<dyn Link>,
    lose_replies: Arc<AtomicBool>,
}

impl Link for ReplyLossLink {
    fn endpoint(&self) -> &Endpoint {
        self.inner.endpoint()
    }

    fn exchange(&mut self, commands: &[Command]) -> LinkResult<Vec<RedisValue>> {
        let replies = self.inner.exchange(commands)?;
        if self.lose_replies.load(Ordering::SeqCst) {
            return Err(LinkError::Timeout(Duration::from_secs(2)));
        }
        Ok(replies)
    }
}

/// A standalone two-tier cache whose replies can be made to go missing.
pub fn reply_loss_cache() -> (TieredCache, ReplyLossDialer) {
    let dialer = ReplyLossDialer::default();
    let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1:6379"]);
    let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));
    (cache_over(remote, BloomConfig::default()), dialer)
}
