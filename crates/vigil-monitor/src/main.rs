//! # Vigil Monitor
//!
//! Connects to the home security event backend and serves the derived
//! state (batches, service health, zone presence) over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! vigil
//!
//! # Run with a specific config file
//! VIGIL_CONFIG=/path/to/vigil.toml vigil
//!
//! # Run with environment variables
//! VIGIL_UPSTREAM_URL=ws://nvr.local:8000/ws/events VIGIL_PORT=8080 vigil
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        upstream = %config.upstream.url,
        zone = %config.presence.zone_id,
        "Starting Vigil monitor on {}:{}",
        config.http.host,
        config.http.port
    );

    metrics::init_metrics();

    let state = Arc::new(handlers::AppState::new(config)?);
    let _sweeper = state.presence.start_sweeper();

    let upstream = tokio::spawn(handlers::run_upstream(Arc::clone(&state)));
    tokio::spawn(async move {
        match upstream.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Upstream stopped: {:#}", e),
            Err(e) => tracing::error!("Upstream task failed: {}", e),
        }
    });

    handlers::run_server(state).await?;

    Ok(())
}
