//! Trellis - unified CLI entrypoint.
//!
//! Usage:
//!   trellis config validate --config config/trellis.toml
//!   trellis --instance sessions ping
//!   trellis set greeting hello --ttl-ms 60000
//!   trellis bloom add seen-users alice
//!   trellis lock acquire jobs:nightly worker-1 --ttl-ms 30000

use anyhow::Result;
use clap::Parser;
use trellis::cli::commands::{
    run_bloom, run_config, run_del, run_get, run_lock, run_ping, run_set,
};
use trellis::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = cli.global();

    match cli.command {
        Commands::Config(args) => run_config(&global, args),
        Commands::Ping => run_ping(&global),
        Commands::Get(args) => run_get(&global, args),
        Commands::Set(args) => run_set(&global, args),
        Commands::Del(args) => run_del(&global, args),
        Commands::Bloom(args) => run_bloom(&global, args),
        Commands::Lock(args) => run_lock(&global, args),
    }
}
