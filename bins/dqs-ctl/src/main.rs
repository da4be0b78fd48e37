//! dqs-ctl - operator tool for the STARS DQS control node.

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all)]

mod backend;
mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dqs_core::RuntimeConfig;
use tracing_subscriber::EnvFilter;

/// dqs-ctl: inspect and drive DQS queue bindings and control spaces
#[derive(Parser)]
#[command(name = "dqs-ctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runtime config file (default: first of /etc/dqs/dqs.toml, /usr/lib/dqs/dqs.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Control node, overriding the configured one
    #[arg(long, global = true)]
    node: Option<String>,

    /// Talk to the in-memory simulator instead of the kernel
    #[arg(long, global = true)]
    sim: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue-to-queue bindings
    #[command(subcommand)]
    Queue(commands::QueueCommand),

    /// Mbuf pools bound to queues
    #[command(subcommand)]
    Pool(commands::PoolCommand),

    /// Per-stream control spaces
    #[command(subcommand)]
    CtrlSpace(commands::CtrlSpaceCommand),

    /// Run a configured stream through one scheduling round on the simulator
    Simulate(commands::SimulateArgs),

    /// Effective runtime configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}

fn load_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::load().context("loading runtime config")?,
    };
    if let Some(node) = &cli.node {
        config.device.node.clone_from(node);
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Queue(cmd) => commands::queue(&cmd, &backend::open(&config, cli.sim), cli.format),
        Commands::Pool(cmd) => commands::pool(&cmd, &backend::open(&config, cli.sim), cli.format),
        Commands::CtrlSpace(cmd) => commands::ctrl_space(&cmd, &backend::open(&config, cli.sim), cli.format),
        Commands::Simulate(args) => commands::simulate(&args, config, cli.format),
        Commands::Config(cmd) => commands::config(&cmd, &config, cli.format),
    }
}
