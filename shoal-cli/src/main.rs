//! Shoal CLI - run a tracker-coordinated swarm from the command line

mod commands;

use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use shoal_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Tracker-coordinated segment swarming")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full run log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let run_log = init_tracing(cli.log_level.into(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;
    tracing::debug!("Full trace of this run goes to {}", run_log.display());

    commands::handle_command(cli.command).await
}
