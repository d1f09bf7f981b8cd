//! Trendline - trends over event data
//!
//! # Usage
//!
//! ```bash
//! # Daily sign ups over the last week
//! trendline run --events events.jsonl --filter filter.json
//!
//! # Team timezone, pinned reference instant, JSON output
//! trendline run -e events.jsonl -p persons.jsonl -f filter.json \
//!     --timezone Europe/Amsterdam --now 2020-01-04T13:00:00Z --format json
//! ```

mod cmd;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::Config;

/// Trendline - trends over event data
#[derive(Parser, Debug)]
#[command(name = "trendline")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute a trends result from local event files
    Run(cmd::run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let log_level = cli
        .log_level
        .unwrap_or_else(|| config.log.level.as_str().to_string());
    init_logging(&log_level)?;

    match cli.command {
        Command::Run(args) => cmd::run::run(args, config).await,
    }
}

/// Initialize the tracing subscriber; logs go to stderr so stdout stays parseable
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    Ok(())
}
