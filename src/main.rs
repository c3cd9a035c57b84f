mod commands;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "calmirror")]
#[command(about = "Mirror an ICS feed into a Google calendar", version)]
struct Cli {
    /// Config file (defaults to ~/.config/calmirror/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync loop until interrupted
    Run {
        /// Also serve the control API on this address (e.g. 127.0.0.1:4097)
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Run a single pass and print the report
    Sync {
        /// Only reconcile the near-term window
        #[arg(long)]
        quick: bool,
    },
    /// Validate the config and parse the feed without touching the calendar
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,calmirror=info,calmirror_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => calmirror_core::Config::default_path()?,
    };

    match cli.command {
        Commands::Run { listen } => commands::run::run(&config_path, listen).await,
        Commands::Sync { quick } => commands::sync::run(&config_path, quick).await,
        Commands::Check => commands::check::run(&config_path).await,
    }
}
