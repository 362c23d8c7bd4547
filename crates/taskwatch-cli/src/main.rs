//! taskwatch - terminal live tap for trading-task status updates.

use anyhow::Result;
use clap::Parser;
use taskwatch_cli::config::{resolve_config_path, resolve_token};
use tracing::{info, warn};

/// Follow trading-task status updates from the dashboard server.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TASKWATCH_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Auth token (can also be set via TASKWATCH_TOKEN env var)
    #[arg(short, long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    taskwatch_ws::init_crypto();

    let args = Args::parse();

    taskwatch_telemetry::init_logging()?;

    info!("Starting taskwatch v{}", env!("CARGO_PKG_VERSION"));

    let config_path = resolve_config_path(args.config);
    info!(config_path = %config_path, "Loading configuration");

    let config = taskwatch_cli::AppConfig::load(&config_path)?;
    info!(server_url = %config.server_url, "Configuration loaded");

    let token = resolve_token(args.token);
    if token.is_none() {
        warn!("No auth token given, live updates disabled");
    }

    let app = taskwatch_cli::Application::new(config, token)?;
    app.run().await?;

    Ok(())
}
