//! CLI command implementations.

mod bloom;
mod config;
mod data;
mod lock;

pub use bloom::{run_bloom, BloomArgs};
pub use config::{run_config, ConfigArgs};
pub use data::{run_del, run_get, run_ping, run_set, DelArgs, GetArgs, SetArgs};
pub use lock::{run_lock, LockArgs};

use crate::connector::Topology;
use crate::core::config::{Config, ConfigOverrides};
use crate::registry::Registry;
use crate::tiered::TieredCache;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/trellis.toml";

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub instance: String,
    pub log_level: Option<String>,
    pub nodes: Vec<String>,
    pub topology: Option<Topology>,
}

impl GlobalOptions {
    /// Load the configuration file, falling back to defaults when no file
    /// was named and the default path does not exist, then apply overrides.
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                load_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Config::default(),
        };
        config.apply_overrides(&ConfigOverrides {
            log_level: self.log_level.clone(),
            nodes: self.nodes.clone(),
            topology: self.topology,
        });
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, start logging and open the selected instance.
    pub fn open(&self) -> Result<Arc<TieredCache>> {
        let config = self.load_config()?;
        init_tracing(&config.telemetry.log_level);
        let registry = Registry::new(config);
        registry
            .instance(&self.instance)
            .with_context(|| format!("failed to open instance '{}'", self.instance))
    }
}

fn load_file(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("failed to load config from {:?}", path))
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A second init in the same process (tests) is not an error.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_overrides_apply_to_loaded_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[redis]\ntopology = \"standalone\"\nnodes = [\"10.0.0.1\"]").unwrap();
        let options = GlobalOptions {
            config: Some(file.path().to_path_buf()),
            nodes: vec!["10.0.0.9:7000".to_string()],
            log_level: Some("debug".to_string()),
            ..GlobalOptions::default()
        };
        let config = options.load_config().unwrap();
        assert_eq!(config.redis.nodes, vec!["10.0.0.9:7000".to_string()]);
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_missing_named_file_is_an_error() {
        let options = GlobalOptions {
            config: Some(PathBuf::from("/nonexistent/trellis.toml")),
            ..GlobalOptions::default()
        };
        assert!(options.load_config().is_err());
    }
}
