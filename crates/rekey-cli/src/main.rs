//! Rekey operator CLI
//!
//! Runs the key lifecycle controllers against a local state directory and
//! offers the surrounding operations a single-host deployment needs: setting
//! the encryption mode, standing in for the replica rollout tooling, and
//! printing the lifecycle status.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod context;
mod migrator;

use commands::{
    mode::{handle_mode_command, ModeCommand},
    replicas::{handle_replicas_command, ReplicasCommand},
    run::{handle_run_command, RunCommand},
    status::{handle_status_command, StatusCommand},
};
use config::ConfigOverrides;
use context::CliContext;

#[derive(Parser)]
#[command(name = "rekey")]
#[command(about = "Rekey - encryption key lifecycle controllers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Shared-state directory
    #[arg(long, global = true, default_value = ".rekey/state")]
    state_dir: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controllers until interrupted
    Run(RunCommand),

    /// Show or change the encryption mode
    Mode(ModeCommand),

    /// Simulated replica fleet
    #[command(subcommand)]
    Replicas(ReplicasCommand),

    /// Show keys, target configuration, and replica convergence
    Status(StatusCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::load_config(cli.config.as_deref(), &cli.overrides)?;
    let ctx = CliContext::open(&cli.state_dir, config).await?;

    match cli.command {
        Commands::Run(cmd) => handle_run_command(&ctx, cmd).await?,
        Commands::Mode(cmd) => handle_mode_command(&ctx, cmd).await?,
        Commands::Replicas(cmd) => handle_replicas_command(&ctx, cmd).await?,
        Commands::Status(cmd) => handle_status_command(&ctx, cmd).await?,
    }

    Ok(())
}
