//! Config command implementation.

use super::GlobalOptions;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration, requiring every instance to be usable.
    Validate,
    /// Print configuration with defaults.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(global: &GlobalOptions, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(global),
        ConfigCommand::Show { format } => show_config(global, &format),
    }
}

fn validate_config(global: &GlobalOptions) -> Result<()> {
    let config = global.load_config()?;
    println!("✓ Config file parsed");

    config.validate_strict()?;
    for name in config.instance_names() {
        if let Some(instance) = config.instance(&name) {
            let (topology, endpoints) = instance.check()?;
            println!("  {}: {} ({} node(s))", name, topology, endpoints.len());
        }
    }

    println!("✓ Configuration validation complete");
    Ok(())
}

fn show_config(global: &GlobalOptions, format: &str) -> Result<()> {
    let config = global.load_config()?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!(
            "{}",
            toml::to_string_pretty(&config).context("failed to render config as TOML")?
        ),
        other => anyhow::bail!("unknown format '{}' (expected toml or json)", other),
    }
    Ok(())
}
