//! PanelSync CLI
//!
//! Runs one reconciliation cycle between this child node and its parent
//! panel, then exits. Intended to be started by an external timer.

mod cycle;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Sync traffic and users with the parent panel.
#[derive(Parser)]
#[command(name = "panelsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, env = "PANELSYNC_CONFIG", default_value = panelsync_engine::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let outcome = cycle::run(&cli.config);
    ExitCode::from(outcome.exit_code())
}
