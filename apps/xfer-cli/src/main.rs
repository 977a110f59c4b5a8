//! objxfer command-line entry point.

mod app;
mod args;

use std::path::Path;

use clap::Parser;
use objxfer_transfer::TransferConfig;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = args::Args::parse();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting xfer-cli");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| Path::new("objxfer.json").to_path_buf());
    let config = TransferConfig::load(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        chunk_size = config.chunk_size(),
        max_concurrency = config.max_concurrency(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(args, config))?;
    Ok(())
}
