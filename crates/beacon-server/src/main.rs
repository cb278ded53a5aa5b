//! # Beacon Server
//!
//! Realtime event hub for stream overlays, with a media and trigger API.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! beacon
//!
//! # Run with a specific config file
//! BEACON_CONFIG=/path/to/beacon.toml beacon
//!
//! # Run with environment variables
//! BEACON_PORT=21100 BEACON_HOST=0.0.0.0 beacon
//! ```

mod config;
mod error;
mod events;
mod handlers;
mod media;
mod metrics;
mod trigger;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Beacon server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
