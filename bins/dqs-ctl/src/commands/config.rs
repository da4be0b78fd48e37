//! Show the effective runtime configuration.

use clap::Subcommand;
use dqs_core::RuntimeConfig;

use crate::output::OutputFormat;

/// Configuration commands.
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the configuration after file loading and overrides
    Show,
}

/// Run a configuration command.
pub fn config(cmd: &ConfigCommand, config: &RuntimeConfig, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Table | OutputFormat::Raw => print!("{}", toml::to_string_pretty(config)?),
        },
    }
    Ok(())
}
