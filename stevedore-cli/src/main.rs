//! Stevedore CLI - command-line interface for the deployment-manifest
//! reconciler.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stevedore_reconciler::observability::{init_tracing, LogFormat, TracingConfig};

/// Stevedore - declarative deployment-manifest reconciler.
#[derive(Parser)]
#[command(name = "stevedore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciler over a manifest file or directory
    Run {
        /// Path to the manifest file or directory
        #[arg(short, long)]
        manifests: PathBuf,

        /// Re-apply manifests when files change
        #[arg(long)]
        watch: bool,

        /// Host for the status API
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port for the status API
        #[arg(short, long, default_value = "8484")]
        port: u16,

        /// Reconcile tick interval in milliseconds
        #[arg(long)]
        tick_interval_ms: Option<u64>,
    },

    /// Validate a manifest file or directory without applying it
    Validate {
        /// Path to the manifest file or directory
        file: PathBuf,
    },

    /// Query reconciliation status from a running reconciler
    Status {
        /// Identity to query (e.g. "deployment/web-a"); all when omitted
        identity: Option<String>,

        /// Server host
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Server port
        #[arg(short, long, default_value = "8484")]
        port: u16,
    },

    /// Trigger an immediate reconcile cycle on a running reconciler
    Reconcile {
        /// Server host
        #[arg(short = 'H', long, default_value = "localhost")]
        host: String,

        /// Server port
        #[arg(short, long, default_value = "8484")]
        port: u16,
    },

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Respect RUST_LOG and STEVEDORE_LOG_FORMAT when set.
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());
    let format = std::env::var("STEVEDORE_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse::<LogFormat>().ok())
        .unwrap_or(LogFormat::Compact);

    init_tracing(&TracingConfig::new(filter, format))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run {
            manifests,
            watch,
            host,
            port,
            tick_interval_ms,
        } => commands::run::run(&manifests, watch, &host, port, tick_interval_ms).await,
        Commands::Validate { file } => commands::validate::run(&file),
        Commands::Status {
            identity,
            host,
            port,
        } => commands::status::run(identity.as_deref(), &host, port).await,
        Commands::Reconcile { host, port } => commands::reconcile::run(&host, port).await,
        Commands::Version => commands::version::run(),
    }
}
