//! Lock commands.

use super::GlobalOptions;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::time::Duration;

/// Distributed lock operations.
#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(subcommand)]
    pub command: LockCommand,
}

/// Lock subcommands.
#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Take the lock at KEY for TOKEN.
    Acquire {
        key: String,
        token: String,
        /// Lock expiry in milliseconds.
        #[arg(long, default_value_t = 30_000)]
        ttl_ms: u64,
    },
    /// Release the lock at KEY if TOKEN still holds it.
    Release { key: String, token: String },
}

/// Run the lock command.
pub fn run_lock(global: &GlobalOptions, args: LockArgs) -> Result<()> {
    let cache = global.open()?;
    let done = match args.command {
        LockCommand::Acquire { key, token, ttl_ms } => {
            cache.acquire_lock(&key, &token, Duration::from_millis(ttl_ms))?
        }
        LockCommand::Release { key, token } => cache.release_lock(&key, &token)?,
    };
    if !done {
        anyhow::bail!("lock not held by this token");
    }
    println!("OK");
    Ok(())
}
