//! Trellis - topology-aware key-value client with a two-tier cache.
//!
//! Trellis talks to a remote key-value store deployed as a single node, a
//! primary with discovery-managed failover, a client-sharded node set or a
//! server-side cluster. Every deployment shape sits behind one capability-aware
//! connector, and a process-local cache tier is kept in front of it with an
//! invalidate-on-write protocol. A Bloom filter and a mutual-exclusion lock are
//! built on top of the same dispatch layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Registry (name → TieredCache)                   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TieredCache                             │
//! │   LocalTier (moka)  │  Codec  │  BloomFilter  │  lock           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Remote (dispatch layer)                      │
//! │   precondition → capability → lease → run → release             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Connector                              │
//! │  Standalone │ Replicated │ Sharded │ Clustered   (pools, RESP2) │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error types
//!
//! ## Remote
//! - [`protocol`] - RESP2 values, commands and codec
//! - [`connector`] - Topology variants, pools and the capability matrix
//! - [`dispatch`] - The remote operation set and pipelines
//!
//! ## Caching
//! - [`local`] - Process-local cache tier
//! - [`codec`] - Value serialization
//! - [`tiered`] - Two-tier coordinator
//! - [`registry`] - Named instances
//!
//! ## Coordination
//! - [`bloom`] - Bloom filter over a remote bitmap
//! - [`lock`] - Distributed mutual-exclusion lock
//!
//! ## CLI
//! - [`cli`] - Command line surface

// Core infrastructure
pub mod core;

// Wire and connectors
pub mod connector;
pub mod dispatch;
pub mod protocol;

// Caching
pub mod codec;
pub mod local;
pub mod registry;
pub mod tiered;

// Coordination
pub mod bloom;
pub mod lock;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error};
pub use bloom::BloomFilter;
pub use codec::{Codec, JsonCodec};
pub use connector::{Connector, Topology};
pub use dispatch::{Pipeline, Remote};
pub use error::{TrellisError, TrellisResult};
pub use local::{Cached, LocalTier, Lookup};
pub use registry::Registry;
pub use tiered::TieredCache;
