//! Command-line interface.
//!
//! Small operational CLI over one configured instance.

pub mod commands;

use crate::connector::Topology;
use crate::core::config::DEFAULT_INSTANCE;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Trellis - topology-aware key-value client.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Instance to use ("default" is the [redis] section).
    #[arg(short, long, global = true, default_value = DEFAULT_INSTANCE)]
    pub instance: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Replace the default instance's node list (repeatable).
    #[arg(long = "node", global = true)]
    pub nodes: Vec<String>,

    /// Replace the default instance's topology.
    #[arg(long, global = true)]
    pub topology: Option<Topology>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Options shared by every command.
    pub fn global(&self) -> commands::GlobalOptions {
        commands::GlobalOptions {
            config: self.config.clone(),
            instance: self.instance.clone(),
            log_level: self.log_level.clone(),
            nodes: self.nodes.clone(),
            topology: self.topology,
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Check the instance answers.
    Ping,
    /// Read a key.
    Get(commands::GetArgs),
    /// Write a key.
    Set(commands::SetArgs),
    /// Delete a key.
    Del(commands::DelArgs),
    /// Bloom filter operations.
    Bloom(commands::BloomArgs),
    /// Distributed lock operations.
    Lock(commands::LockArgs),
}
