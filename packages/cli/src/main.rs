#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Entry point for the taxi congestion audit.
//!
//! A run with no arguments executes every stage with the embedded default
//! configuration. Uses `indicatif-log-bridge` (via
//! [`taxi_audit_cli_utils::init_logger`]) to route `log` output through
//! `indicatif::MultiProgress` so that log lines and progress bars never
//! fight for the terminal.

mod pipeline;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "taxi_audit",
    about = "Congestion pricing audit over NYC taxi trip batches"
)]
struct Cli {
    /// Configuration file (defaults to `$TAXI_AUDIT_CONFIG`, then the
    /// built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory of raw `{yellow|green}_tripdata_{YYYY-MM}.parquet` batches
    #[arg(long)]
    raw_dir: Option<PathBuf>,
    /// Directory receiving the clean and audit partitions
    #[arg(long)]
    processed_dir: Option<PathBuf>,
    /// Directory receiving derived tables and the run manifest
    #[arg(long)]
    results_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = taxi_audit_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = taxi_audit_config::load(cli.config.as_deref())?;
    if cli.raw_dir.is_some() {
        config.paths.raw_dir = cli.raw_dir;
    }
    if cli.processed_dir.is_some() {
        config.paths.processed_dir = cli.processed_dir;
    }
    if cli.results_dir.is_some() {
        config.paths.results_dir = cli.results_dir;
    }

    pipeline::run(&config, &multi).await?;

    Ok(())
}
