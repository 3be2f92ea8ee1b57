//! Lazysnap CLI Binary

use anyhow::Context;
use clap::Parser;
use lazysnap::cli::{execute, Cli};
use lazysnap::logging::init_logging;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.load_config().context("failed to load configuration")?;
    init_logging(&config.logging).context("failed to initialize logging")?;
    info!(root = %config.root.display(), "lazysnap starting");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let output = execute(&config, &cli.command, &cancel).await?;
    println!("{}", output);
    Ok(())
}
