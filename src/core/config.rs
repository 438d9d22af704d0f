//! Configuration parsing and validation.
//!
//! Trellis configuration is loaded from TOML files. The `[redis]` section
//! describes the default instance; `[instances.<name>]` sections describe
//! named instances resolved through the [`Registry`](crate::Registry).
//!
//! Shape problems (log level, pool limits, filter parameters) are rejected at
//! load time. Whether an instance names a topology and at least one node is
//! checked by [`TopologyConfig::check`] when its connector is built, so a
//! half-configured instance only fails when it is first used.

use crate::connector::{Endpoint, LinkSettings, PoolSettings, Topology};
use crate::core::error::{TrellisError, TrellisResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Name under which the `[redis]` section is registered.
pub const DEFAULT_INSTANCE: &str = "default";

/// Largest bitmap a Bloom filter may address (the store's bitmap limit).
pub const MAX_BLOOM_BITS: u64 = 1 << 32;

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Default instance.
    #[serde(default)]
    pub redis: TopologyConfig,

    /// Named instances.
    #[serde(default)]
    pub instances: BTreeMap<String, TopologyConfig>,

    /// Local cache tier.
    #[serde(default)]
    pub local: LocalTierConfig,

    /// Bloom filter descriptor.
    #[serde(default)]
    pub bloom: BloomConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Connection settings for one remote store deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Optional instance name, used in log fields.
    #[serde(default)]
    pub name: Option<String>,

    /// Deployment shape. Missing means the instance is unconfigured.
    #[serde(default)]
    pub topology: Option<Topology>,

    /// Node list as "host:port" (port defaults to 6379). For the replicated
    /// topology these are the discovery (sentinel) endpoints.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Password sent with AUTH on every new connection.
    #[serde(default)]
    pub password: Option<String>,

    /// Database index selected on connect. Ignored by the clustered topology.
    #[serde(default)]
    pub database: u32,

    /// Primary name asked of the discovery endpoints.
    #[serde(default = "default_master_name")]
    pub master_name: String,

    /// Connection pool limits.
    #[serde(default)]
    pub pool: PoolConfig,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Socket read/write timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            name: None,
            topology: None,
            nodes: Vec::new(),
            password: None,
            database: 0,
            master_name: default_master_name(),
            pool: PoolConfig::default(),
            connect_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Connection pool limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections per node, leased and idle together.
    #[serde(default = "default_max_total")]
    pub max_total: usize,

    /// Maximum idle connections kept per node.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Maximum time to wait for a free connection, in milliseconds.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: default_max_total(),
            max_idle: default_max_idle(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// Local cache tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTierConfig {
    /// When false every read goes to the remote store.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Maximum number of entries before size-based eviction.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Seconds an entry lives after it was written. Zero disables.
    #[serde(default = "default_expire_secs")]
    pub expire_after_write_secs: u64,

    /// Seconds an entry lives after it was last read. Zero disables.
    #[serde(default = "default_expire_secs")]
    pub expire_after_access_secs: u64,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_capacity: default_initial_capacity(),
            max_capacity: default_max_capacity(),
            expire_after_write_secs: default_expire_secs(),
            expire_after_access_secs: default_expire_secs(),
        }
    }
}

/// Bloom filter descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Bit-space size M.
    #[serde(default = "default_bloom_bits")]
    pub bit_count: u64,

    /// Number of hash functions k.
    #[serde(default = "default_bloom_hashes")]
    pub hash_count: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            bit_count: default_bloom_bits(),
            hash_count: default_bloom_hashes(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_master_name() -> String {
    "CacheMaster".to_string()
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_max_total() -> usize {
    100
}

fn default_max_idle() -> usize {
    50
}

fn default_max_wait_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_initial_capacity() -> usize {
    1_000
}

fn default_max_capacity() -> u64 {
    50_000
}

fn default_expire_secs() -> u64 {
    300
}

fn default_bloom_bits() -> u64 {
    MAX_BLOOM_BITS
}

fn default_bloom_hashes() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if !overrides.nodes.is_empty() {
            self.redis.nodes = overrides.nodes.clone();
        }
        if let Some(topology) = overrides.topology {
            self.redis.topology = Some(topology);
        }
    }

    /// Look up the settings registered under `name`.
    ///
    /// [`DEFAULT_INSTANCE`] resolves to the `[redis]` section.
    pub fn instance(&self, name: &str) -> Option<&TopologyConfig> {
        if name == DEFAULT_INSTANCE {
            Some(&self.redis)
        } else {
            self.instances.get(name)
        }
    }

    /// Names of every configured instance, default first.
    pub fn instance_names(&self) -> Vec<String> {
        std::iter::once(DEFAULT_INSTANCE.to_string())
            .chain(self.instances.keys().cloned())
            .collect()
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_pool("redis", &self.redis.pool)?;
        for (name, instance) in &self.instances {
            if name == DEFAULT_INSTANCE {
                anyhow::bail!("instances.{} is reserved for the [redis] section", name);
            }
            self.validate_pool(&format!("instances.{}", name), &instance.pool)?;
        }
        self.validate_local()?;
        self.validate_bloom()?;
        self.validate_telemetry()?;
        Ok(())
    }

    /// Validate, additionally requiring every instance to be usable.
    pub fn validate_strict(&self) -> Result<()> {
        self.validate()?;
        for name in self.instance_names() {
            if let Some(instance) = self.instance(&name) {
                instance
                    .check()
                    .with_context(|| format!("instance '{}' is not usable", name))?;
            }
        }
        Ok(())
    }

    fn validate_pool(&self, prefix: &str, pool: &PoolConfig) -> Result<()> {
        if pool.max_total == 0 {
            anyhow::bail!("{}.pool.max_total must be > 0", prefix);
        }
        if pool.max_idle > pool.max_total {
            anyhow::bail!(
                "{}.pool.max_idle ({}) cannot exceed max_total ({})",
                prefix,
                pool.max_idle,
                pool.max_total
            );
        }
        Ok(())
    }

    fn validate_local(&self) -> Result<()> {
        if self.local.enabled && self.local.max_capacity == 0 {
            anyhow::bail!("local.max_capacity must be > 0 when the local tier is enabled");
        }
        Ok(())
    }

    fn validate_bloom(&self) -> Result<()> {
        if self.bloom.bit_count == 0 || self.bloom.bit_count > MAX_BLOOM_BITS {
            anyhow::bail!(
                "bloom.bit_count must be in 1..={}, got: {}",
                MAX_BLOOM_BITS,
                self.bloom.bit_count
            );
        }
        if self.bloom.hash_count == 0 {
            anyhow::bail!("bloom.hash_count must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

impl TopologyConfig {
    /// Create settings for `topology` over `nodes` with every other field
    /// defaulted.
    pub fn new<S: Into<String>>(topology: Topology, nodes: impl IntoIterator<Item = S>) -> Self {
        Self {
            topology: Some(topology),
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Label used in log fields.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_INSTANCE)
    }

    /// Resolve the topology and parsed node list, or explain why the
    /// instance cannot be used.
    pub fn check(&self) -> TrellisResult<(Topology, Vec<Endpoint>)> {
        let topology = self.topology.ok_or_else(|| {
            TrellisError::configuration(format!("redis {} has no topology", self.label()))
        })?;
        if self.nodes.is_empty() {
            return Err(TrellisError::configuration(format!(
                "redis {} init failed, nodes not configured",
                self.label()
            )));
        }
        let endpoints = self
            .nodes
            .iter()
            .map(|node| node.parse::<Endpoint>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(TrellisError::configuration)?;
        if topology == Topology::Standalone && endpoints.len() > 1 {
            tracing::warn!(
                instance = %self.label(),
                nodes = endpoints.len(),
                "standalone topology uses only the first node"
            );
        }
        Ok((topology, endpoints))
    }

    /// Per-connection settings derived from this configuration.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            password: self.password.clone(),
            database: match self.topology {
                Some(Topology::Clustered) => 0,
                _ => self.database,
            },
        }
    }

    /// Pool limits derived from this configuration.
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_total: self.pool.max_total.max(1),
            max_idle: self.pool.max_idle,
            max_wait: Duration::from_millis(self.pool.max_wait_ms),
        }
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the default instance's node list.
    pub nodes: Vec<String>,
    /// Override the default instance's topology.
    pub topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pool_and_tier_limits() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.redis.pool.max_total, 100);
        assert_eq!(config.redis.pool.max_idle, 50);
        assert_eq!(config.redis.pool.max_wait_ms, 5_000);
        assert_eq!(config.redis.connect_timeout_ms, 2_000);
        assert_eq!(config.redis.master_name, "CacheMaster");
        assert_eq!(config.local.max_capacity, 50_000);
        assert_eq!(config.local.expire_after_write_secs, 300);
        assert_eq!(config.bloom.bit_count, 1 << 32);
        assert_eq!(config.bloom.hash_count, 8);
    }

    #[test]
    fn test_topology_aliases() {
        let config = Config::from_toml(
            r#"
            [redis]
            topology = "sentinel"
            nodes = ["10.0.0.1:26379"]

            [instances.sessions]
            topology = "cluster"
            nodes = ["10.0.0.2"]
            "#,
        )
        .unwrap();
        assert_eq!(config.redis.topology, Some(Topology::Replicated));
        let sessions = config.instance("sessions").unwrap();
        assert_eq!(sessions.topology, Some(Topology::Clustered));
        let (_, endpoints) = sessions.check().unwrap();
        assert_eq!(endpoints[0].port, 6379);
    }

    #[test]
    fn test_missing_nodes_is_configuration_error() {
        let config = TopologyConfig {
            topology: Some(Topology::Standalone),
            ..TopologyConfig::default()
        };
        let err = config.check().unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
        assert!(err.to_string().contains("nodes not configured"));
    }

    #[test]
    fn test_invalid_bloom_bits_rejected() {
        let result = Config::from_toml("[bloom]\nbit_count = 8589934592\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_idle_above_total_rejected() {
        let result = Config::from_toml("[redis.pool]\nmax_total = 4\nmax_idle = 8\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_clustered_ignores_database() {
        let mut config = TopologyConfig::new(Topology::Clustered, ["127.0.0.1:7000"]);
        config.database = 3;
        assert_eq!(config.link_settings().database, 0);
    }

    #[test]
    fn test_strict_validation_requires_nodes() {
        let config = Config::from_toml("[redis]\ntopology = \"standalone\"\n").unwrap();
        assert!(config.validate_strict().is_err());
    }
}
