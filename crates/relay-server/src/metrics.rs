//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections accepted (counter, labels: kind).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections removed (counter, labels: kind).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connections refused at accept time (counter, labels: transport).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "relay_connections_rejected_total";
/// Messages fanned out by the hub (counter).
pub const BROADCAST_MESSAGES_TOTAL: &str = "relay_broadcast_messages_total";
/// Broadcast deliveries that failed and evicted the recipient (counter).
pub const BROADCAST_DELIVERY_FAILURES_TOTAL: &str = "relay_broadcast_delivery_failures_total";
/// Running stream sessions (gauge).
pub const STREAM_SESSIONS_ACTIVE: &str = "relay_stream_sessions_active";
/// Events delivered by stream sessions (counter, labels: event).
pub const STREAM_EVENTS_TOTAL: &str = "relay_stream_events_total";
/// Generation or delivery failures inside stream sessions (counter, labels: category).
pub const STREAM_FAILURES_TOTAL: &str = "relay_stream_failures_total";
/// Sessions terminated by the consecutive-failure threshold (counter).
pub const STREAM_ESCALATIONS_TOTAL: &str = "relay_stream_escalations_total";
