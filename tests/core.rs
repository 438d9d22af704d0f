//! Core infrastructure tests.

mod common;

use common::create_config;
use std::sync::Arc;
use trellis::config::{Config, DEFAULT_INSTANCE};
use trellis::connector::{MemoryDialer, Topology};
use trellis::{Registry, TrellisError};

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_full_config() {
    let file = create_config(
        r#"
[redis]
topology = "sentinel"
nodes = ["10.0.0.10:26379", "10.0.0.11:26379", "10.0.0.12"]
password = "secret"
database = 2
master_name = "orders"
connect_timeout_ms = 500

[redis.pool]
max_total = 16
max_idle = 8
max_wait_ms = 250

[instances.sessions]
topology = "cluster"
nodes = ["10.1.0.1:7000", "10.1.0.2:7000"]

[local]
max_capacity = 1000
expire_after_write_secs = 60
expire_after_access_secs = 0

[bloom]
bit_count = 1048576
hash_count = 6

[telemetry]
log_level = "debug"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.redis.topology, Some(Topology::Replicated));
    assert_eq!(config.redis.master_name, "orders");
    assert_eq!(config.redis.database, 2);
    assert_eq!(config.redis.pool.max_total, 16);

    let (_, endpoints) = config.redis.check().unwrap();
    assert_eq!(endpoints.len(), 3);
    assert_eq!(endpoints[2].port, 6379);

    let link = config.redis.link_settings();
    assert_eq!(link.password.as_deref(), Some("secret"));
    assert_eq!(link.database, 2);

    assert_eq!(config.instance_names(), vec![DEFAULT_INSTANCE, "sessions"]);
    assert_eq!(
        config.instance("sessions").unwrap().topology,
        Some(Topology::Clustered)
    );
    assert_eq!(config.local.expire_after_access_secs, 0);
    assert_eq!(config.bloom.hash_count, 6);
    assert_eq!(config.telemetry.log_level, "debug");
}

#[test]
fn validate_invalid_log_level() {
    let file = create_config("[telemetry]\nlog_level = \"loud\"\n");
    let result = Config::from_file(file.path());
    assert!(result.is_err());
    assert!(format!("{:#}", result.unwrap_err()).contains("log_level"));
}

#[test]
fn validate_zero_hash_count() {
    let file = create_config("[bloom]\nhash_count = 0\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn reserved_instance_name_rejected() {
    let file = create_config("[instances.default]\ntopology = \"standalone\"\nnodes = [\"a\"]\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn unknown_topology_rejected() {
    let file = create_config("[redis]\ntopology = \"ring\"\n");
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn incomplete_instance_loads_but_fails_strict_validation() {
    let file = create_config("[instances.cold]\ntopology = \"sharded\"\n");
    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate_strict().is_err());
}

// ============================================================================
// Registry tests
// ============================================================================

#[test]
fn registry_serves_configured_instances() {
    let file = create_config(
        r#"
[redis]
topology = "standalone"
nodes = ["127.0.0.1:6379"]

[instances.sessions]
topology = "sharded"
nodes = ["10.0.0.1:6379", "10.0.0.2:6379"]
"#,
    );
    let config = Config::from_file(file.path()).unwrap();
    let registry = Registry::with_dialer(config, Arc::new(MemoryDialer::new()));

    let default = registry.default_instance().unwrap();
    default.set("k", "v").unwrap();
    assert_eq!(default.get::<String>("k").unwrap().as_deref(), Some("v"));

    let sessions = registry.instance("sessions").unwrap();
    assert_eq!(sessions.remote().topology(), Some(Topology::Sharded));
    assert!(matches!(
        sessions.remote().keys("*"),
        Err(TrellisError::UnsupportedForTopology { .. })
    ));

    assert_eq!(registry.names(), vec![DEFAULT_INSTANCE, "sessions"]);
}

#[test]
fn registry_defers_configuration_errors() {
    let config = Config::from_toml("[redis]\ntopology = \"standalone\"\n").unwrap();
    let registry = Registry::with_dialer(config, Arc::new(MemoryDialer::new()));
    let instance = registry.default_instance().unwrap();
    let err = instance.set("k", "v").unwrap_err();
    assert!(matches!(err, TrellisError::Configuration { .. }));
    assert!(!err.is_retriable());
}

#[test]
fn separate_registries_do_not_share_state() {
    let toml = "[redis]\ntopology = \"standalone\"\nnodes = [\"127.0.0.1\"]\n";
    let first = Registry::with_dialer(Config::from_toml(toml).unwrap(), Arc::new(MemoryDialer::new()));
    let second =
        Registry::with_dialer(Config::from_toml(toml).unwrap(), Arc::new(MemoryDialer::new()));
    first.default_instance().unwrap().set("k", "v").unwrap();
    assert_eq!(
        second.default_instance().unwrap().get::<String>("k").unwrap(),
        None
    );
}
