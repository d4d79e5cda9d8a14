//! Entry point for ollie.
//!
//! Parses command-line arguments, sets up the log file, and hands off to
//! [`ollie::run`].

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ollie::cli::Cli::parse();
    ollie::init_tracing(cli.log_level.as_deref(), cli.log_json)?;
    ollie::run(cli).await
}
