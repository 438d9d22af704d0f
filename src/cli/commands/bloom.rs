//! Bloom filter commands.

use super::GlobalOptions;
use anyhow::Result;
use clap::{Args, Subcommand};

/// Bloom filter operations.
#[derive(Args, Debug)]
pub struct BloomArgs {
    #[command(subcommand)]
    pub command: BloomCommand,
}

/// Bloom subcommands.
#[derive(Subcommand, Debug)]
pub enum BloomCommand {
    /// Add a value to the filter stored at KEY.
    Add { key: String, value: String },
    /// Check whether the filter at KEY may contain a value.
    Contains { key: String, value: String },
}

/// Run the bloom command.
pub fn run_bloom(global: &GlobalOptions, args: BloomArgs) -> Result<()> {
    let cache = global.open()?;
    match args.command {
        BloomCommand::Add { key, value } => {
            if cache.bloom_add(&key, &value)? {
                println!("added");
            } else {
                println!("already present");
            }
        }
        BloomCommand::Contains { key, value } => {
            if cache.bloom_contains(&key, &value)? {
                println!("maybe present");
            } else {
                println!("absent");
            }
        }
    }
    Ok(())
}
