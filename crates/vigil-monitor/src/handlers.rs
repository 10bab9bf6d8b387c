//! HTTP views and upstream wiring for the monitor.
//!
//! The HTTP side is read-only: it serializes whatever the trackers
//! currently hold. All writes arrive through the upstream pump.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use vigil_core::{
    BatchCallbacks, BatchTracker, Dispatcher, Normalizer, ServiceHealthTracker, SystemClock,
    ZonePresenceTracker,
};
use vigil_protocol::{RiskLevel, CATALOG_VERSION};
use vigil_transport::{pump, WebSocketSource};

/// Shared monitor state.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub normalizer: Normalizer,
    pub batches: BatchTracker,
    pub health: ServiceHealthTracker,
    pub presence: ZonePresenceTracker,
    /// Upstream connection flag, written by the pump.
    pub connected: watch::Sender<bool>,
    pub config: Config,
}

impl AppState {
    /// Build the dispatcher and attach every tracker to it.
    ///
    /// # Errors
    ///
    /// Returns an error if a tracker rejects its configuration.
    pub fn new(config: Config) -> Result<Self> {
        let dispatcher = Dispatcher::new();

        let callbacks = BatchCallbacks::default().on_completed(|batch| {
            if matches!(batch.risk_level, Some(RiskLevel::High | RiskLevel::Critical)) {
                warn!(
                    batch = %batch.batch_id,
                    camera = %batch.camera_id,
                    event = batch.event_id.unwrap_or_default(),
                    risk = batch.risk_score.unwrap_or_default(),
                    "High risk event"
                );
            }
        });
        let batches = BatchTracker::with_options(
            &dispatcher,
            config.batch_tracker_config(),
            callbacks,
            Arc::new(SystemClock),
        )
        .context("Failed to attach batch tracker")?;

        let health = ServiceHealthTracker::attach(&dispatcher);

        let presence = ZonePresenceTracker::attach(
            &dispatcher,
            config.presence_config(),
            config.presence.roster.clone(),
        )
        .context("Failed to attach presence tracker")?;

        let (connected, _) = watch::channel(false);

        Ok(Self {
            normalizer: Normalizer::new(dispatcher.clone()),
            dispatcher,
            batches,
            health,
            presence,
            connected,
            config,
        })
    }

    /// Validate and dispatch one upstream message.
    pub fn deliver(&self, message: &Value) -> bool {
        let accepted = self.normalizer.handle_message(message);
        metrics::record_message(accepted);
        metrics::observe(self);
        accepted
    }

    /// JSON snapshot of every derived view.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let dispatcher = self.dispatcher.stats();
        let normalizer = self.normalizer.stats();

        json!({
            "catalogVersion": CATALOG_VERSION.to_string(),
            "upstreamConnected": *self.connected.borrow(),
            "batches": {
                "activeCount": self.batches.active_count(),
                "processing": self.batches.processing_batches(),
                "completed": self.batches.completed_batches(),
                "failed": self.batches.failed_batches(),
            },
            "services": {
                "hasUnhealthyServices": self.health.has_unhealthy_services(),
                "services": self.health.services(),
                "latestChange": self.health.latest_change(),
            },
            "presence": {
                "zoneId": self.presence.zone_id(),
                "presentCount": self.presence.present_count(),
                "activeCount": self.presence.active_count(),
                "members": self.presence.members(),
            },
            "stats": {
                "accepted": normalizer.accepted,
                "rejected": normalizer.rejected,
                "heartbeats": normalizer.heartbeats,
                "emitted": dispatcher.emitted,
                "handlerFaults": dispatcher.handler_faults,
                "listeners": dispatcher.listener_count,
            },
        })
    }
}

/// Connect to the upstream once and pump its messages into `state`.
///
/// Returns when the upstream closes. There is no reconnection.
///
/// # Errors
///
/// Returns an error if the connection fails or breaks.
pub async fn run_upstream(state: Arc<AppState>) -> Result<()> {
    let url = state.config.upstream.url.clone();
    let mut source = WebSocketSource::connect(&url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    let mut connection = state.connected.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            metrics::record_connected(*connection.borrow_and_update());
            if connection.changed().await.is_err() {
                break;
            }
        }
    });

    let pumped = pump(&mut source, &state.connected, |message| {
        state.deliver(message);
    })
    .await;
    metrics::record_connected(false);
    reporter.abort();

    let stats = pumped.context("Upstream failed")?;
    info!(delivered = stats.delivered, "Upstream closed");
    Ok(())
}

/// Run the HTTP views until shutdown.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    if state.config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(state.config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = state.config.bind_addr()?;
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Vigil views listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "catalogVersion": CATALOG_VERSION.to_string(),
        "upstreamConnected": *state.connected.borrow(),
    }))
}

/// Derived state handler.
async fn state_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.snapshot())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
