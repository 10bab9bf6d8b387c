//! Metrics collection and export for Vigil.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::handlers::AppState;

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "vigil_messages_total";
    pub const HANDLER_FAULTS_TOTAL: &str = "vigil_handler_faults_total";
    pub const UPSTREAM_CONNECTED: &str = "vigil_upstream_connected";
    pub const BATCHES_ACTIVE: &str = "vigil_batches_active";
    pub const SERVICES_UNHEALTHY: &str = "vigil_services_unhealthy";
    pub const MEMBERS_PRESENT: &str = "vigil_members_present";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_TOTAL,
        "Upstream messages by outcome (accepted or rejected)"
    );
    metrics::describe_counter!(
        names::HANDLER_FAULTS_TOTAL,
        "Handler invocations that returned an error or panicked"
    );
    metrics::describe_gauge!(names::UPSTREAM_CONNECTED, "1 while the upstream is connected");
    metrics::describe_gauge!(names::BATCHES_ACTIVE, "Batches currently being analyzed");
    metrics::describe_gauge!(names::SERVICES_UNHEALTHY, "Services not reporting healthy");
    metrics::describe_gauge!(names::MEMBERS_PRESENT, "Roster members seen in the tracked zone");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record one upstream message.
pub fn record_message(accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    counter!(names::MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record the upstream connection flag.
pub fn record_connected(connected: bool) {
    gauge!(names::UPSTREAM_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Refresh gauges from the current derived state.
pub fn observe(state: &AppState) {
    counter!(names::HANDLER_FAULTS_TOTAL).absolute(state.dispatcher.stats().handler_faults);
    gauge!(names::BATCHES_ACTIVE).set(state.batches.active_count() as f64);
    gauge!(names::SERVICES_UNHEALTHY).set(state.health.get_unhealthy_services().len() as f64);
    gauge!(names::MEMBERS_PRESENT).set(state.presence.present_count() as f64);
}
