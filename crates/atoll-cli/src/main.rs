//! Atoll CLI entry point

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use atoll_cli::{cli::Cli, commands::CommandDispatcher, config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = config::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    CommandDispatcher::execute(cli, config)
        .await
        .context("Command execution failed")?;

    info!("Atoll exited successfully");
    Ok(())
}

/// Setup logging from `RUST_LOG`, falling back to the verbosity flag
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
