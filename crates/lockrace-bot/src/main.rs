//! lockrace - Entry Point
//!
//! Races a claim and a transfer against the configured endpoints at the
//! unlock instant and prints the composite result as JSON.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

/// Unlock-time claim/transfer racer
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via LOCKRACE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    lockrace_telemetry::init_logging()?;

    info!("Starting lockrace v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > LOCKRACE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("LOCKRACE_CONFIG").ok())
        .unwrap_or_else(|| lockrace_bot::config::DEFAULT_CONFIG_PATH.to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = lockrace_bot::AppConfig::load(&config_path)?;
    info!(
        unlock_at = ?config.unlock_at,
        unlock_in_ms = ?config.unlock_in_ms,
        "Configuration loaded"
    );

    let app = lockrace_bot::Application::new(config)?;

    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received, stopping both races");
            shutdown.cancel();
        }
    });

    let composite = app.run().await?;
    info!(status = %composite.overall_status, "Done");
    println!("{}", serde_json::to_string_pretty(&composite)?);

    Ok(())
}
