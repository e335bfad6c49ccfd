use std::path::PathBuf;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;

use tracegate::cli::{init_logging, run_decisions};
use tracegate::config::TracegateConfig;
use tracegate::policy::EndToEndPolicy;

/// Decide which requests to trace.
///
/// Reads JSON decision requests from stdin, one per line, and writes one
/// JSON decision per line to stdout.
#[derive(Debug, Parser)]
#[command(name = "tracegate", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured sampling rate (traces per second per endpoint)
    #[arg(long, allow_negative_numbers = true)]
    sampling_rate: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TracegateConfig::load(args.config.as_deref())?;
    if let Some(rate) = args.sampling_rate {
        config.policy.sampling_rate = rate;
    }

    init_logging(&config.logging);

    info!("Starting tracegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Configuration loaded from defaults and environment"),
    }

    let policy = EndToEndPolicy::from_config(&config.policy)?;

    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    let stats = run_decisions(&policy, input, output, shutdown_signal()).await?;
    info!(
        traced = stats.traced,
        dropped = stats.dropped,
        skipped = stats.skipped,
        "Decision summary"
    );

    info!("tracegate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
