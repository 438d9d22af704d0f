//! Key commands: ping, get, set, del.

use super::GlobalOptions;
use anyhow::Result;
use clap::Args;
use std::time::Duration;

/// Read a key.
#[derive(Args, Debug)]
pub struct GetArgs {
    pub key: String,
}

/// Write a key.
#[derive(Args, Debug)]
pub struct SetArgs {
    pub key: String,
    pub value: String,

    /// Remote expiry in milliseconds.
    #[arg(long)]
    pub ttl_ms: Option<u64>,
}

/// Delete a key.
#[derive(Args, Debug)]
pub struct DelArgs {
    pub key: String,
}

pub fn run_ping(global: &GlobalOptions) -> Result<()> {
    let cache = global.open()?;
    cache.remote().ping()?;
    println!("PONG");
    Ok(())
}

pub fn run_get(global: &GlobalOptions, args: GetArgs) -> Result<()> {
    let cache = global.open()?;
    match cache.get_bytes(&args.key)? {
        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
        None => println!("(nil)"),
    }
    Ok(())
}

pub fn run_set(global: &GlobalOptions, args: SetArgs) -> Result<()> {
    let cache = global.open()?;
    match args.ttl_ms {
        Some(ttl_ms) => cache.set_px(&args.key, &args.value, Duration::from_millis(ttl_ms))?,
        None => cache.set(&args.key, &args.value)?,
    }
    println!("OK");
    Ok(())
}

pub fn run_del(global: &GlobalOptions, args: DelArgs) -> Result<()> {
    let cache = global.open()?;
    let deleted = cache.del(&args.key)?;
    println!("(integer) {}", u8::from(deleted));
    Ok(())
}
