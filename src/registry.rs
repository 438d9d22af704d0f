//! Named instances.
//!
//! A [`Registry`] owns the parsed configuration and builds at most one
//! [`TieredCache`] per instance name, on first request. It is an ordinary
//! value: pass it (or an `Arc` of it) to whatever needs instances.

use crate::bloom::BloomFilter;
use crate::connector::{Connector, Dialer, TcpDialer};
use crate::core::config::{Config, TopologyConfig, DEFAULT_INSTANCE};
use crate::core::error::TrellisResult;
use crate::dispatch::Remote;
use crate::local::LocalTier;
use crate::tiered::TieredCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily built instances keyed by name.
pub struct Registry {
    config: Config,
    dialer: Arc<dyn Dialer>,
    instances: RwLock<HashMap<String, Arc<TieredCache>>>,
}

impl Registry {
    /// A registry dialing real TCP connections.
    pub fn new(config: Config) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer))
    }

    pub fn with_dialer(config: Config, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config,
            dialer,
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The instance registered under `name`, building it on first use.
    ///
    /// A name without configuration still yields an instance; its operations
    /// fail with a configuration error.
    pub fn instance(&self, name: &str) -> TrellisResult<Arc<TieredCache>> {
        if let Some(instance) = self.instances.read().get(name) {
            return Ok(Arc::clone(instance));
        }

        let mut instances = self.instances.write();
        if let Some(instance) = instances.get(name) {
            return Ok(Arc::clone(instance));
        }
        let instance = Arc::new(self.build(name)?);
        instances.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    /// The `[redis]` instance.
    pub fn default_instance(&self) -> TrellisResult<Arc<TieredCache>> {
        self.instance(DEFAULT_INSTANCE)
    }

    /// Names of the instances built so far.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn build(&self, name: &str) -> TrellisResult<TieredCache> {
        let mut topology = match self.config.instance(name) {
            Some(config) => config.clone(),
            None => {
                tracing::warn!(instance = name, "no configuration for instance");
                TopologyConfig::default()
            }
        };
        if topology.name.is_none() {
            topology.name = Some(name.to_string());
        }
        let connector = Connector::new(&topology, Arc::clone(&self.dialer));
        let bloom = BloomFilter::new(self.config.bloom)?;
        let local = LocalTier::new(&self.config.local);
        tracing::debug!(instance = name, local = local.is_enabled(), "instance built");
        Ok(TieredCache::new(Remote::new(connector), local, bloom))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("configured", &self.config.instance_names())
            .field("built", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MemoryDialer;
    use crate::core::error::TrellisError;

    fn registry() -> Registry {
        let config = Config::from_toml(
            r#"
            [redis]
            topology = "standalone"
            nodes = ["10.0.0.1:6379"]

            [instances.sessions]
            topology = "standalone"
            nodes = ["10.0.0.2:6379"]
            "#,
        )
        .unwrap();
        Registry::with_dialer(config, Arc::new(MemoryDialer::new()))
    }

    #[test]
    fn test_instances_are_built_once() {
        let registry = registry();
        let a = registry.instance("sessions").unwrap();
        let b = registry.instance("sessions").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["sessions".to_string()]);
    }

    #[test]
    fn test_instances_are_isolated() {
        let registry = registry();
        registry.default_instance().unwrap().set("k", "default").unwrap();
        let sessions = registry.instance("sessions").unwrap();
        assert_eq!(sessions.get::<String>("k").unwrap(), None);
    }

    #[test]
    fn test_unknown_instance_fails_on_use() {
        let registry = registry();
        let missing = registry.instance("nowhere").unwrap();
        assert!(matches!(
            missing.get::<String>("k"),
            Err(TrellisError::Configuration { .. })
        ));
    }
}
