//! # Courier Server
//!
//! Realtime point-to-point message relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! courier
//!
//! # Run with a config file in the search path
//! cp courier.toml /etc/courier/courier.toml && courier
//!
//! # Run with environment variables
//! COURIER_PORT=4000 COURIER_HOST=0.0.0.0 courier
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Courier server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
