//! Metrics collection and export for ChatFlow.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::Result;
use chatflow_core::HubStats;
use chatflow_protocol::WireFormat;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chatflow_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chatflow_connections_active";
    pub const FRAMES_TOTAL: &str = "chatflow_frames_total";
    pub const FRAMES_BYTES: &str = "chatflow_frames_bytes";
    pub const CHAT_MESSAGES_TOTAL: &str = "chatflow_chat_messages_total";
    pub const USERS_ONLINE: &str = "chatflow_users_online";
    pub const USERS_TYPING: &str = "chatflow_users_typing";
    pub const BACKLOG_SIZE: &str = "chatflow_backlog_size";
    pub const EVENTS_DROPPED_TOTAL: &str = "chatflow_events_dropped_total";
    pub const UPLOADS_TOTAL: &str = "chatflow_uploads_total";
    pub const LATENCY_SECONDS: &str = "chatflow_latency_seconds";
    pub const ERRORS_TOTAL: &str = "chatflow_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of WebSocket frames");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of WebSocket frames");
    metrics::describe_counter!(
        names::CHAT_MESSAGES_TOTAL,
        "Chat messages routed, by scope"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Current number of identified users");
    metrics::describe_gauge!(names::USERS_TYPING, "Users currently composing");
    metrics::describe_gauge!(names::BACKLOG_SIZE, "Broadcast messages in the backlog");
    metrics::describe_counter!(
        names::EVENTS_DROPPED_TOTAL,
        "Outbound events dropped on full queues"
    );
    metrics::describe_counter!(names::UPLOADS_TOTAL, "Uploads, by outcome");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Event processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection speaking `format`.
pub fn record_connection(format: &'static str) {
    counter!(names::CONNECTIONS_TOTAL, "format" => format).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "format" => format).increment(1.0);
}

/// Record a closed connection speaking `format`.
pub fn record_disconnection(format: &'static str) {
    gauge!(names::CONNECTIONS_ACTIVE, "format" => format).decrement(1.0);
}

/// Record a WebSocket frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a routed chat message.
pub fn record_chat_message(scope: &'static str) {
    counter!(names::CHAT_MESSAGES_TOTAL, "scope" => scope).increment(1);
}

/// Record event latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an upload.
pub fn record_upload(outcome: &'static str) {
    counter!(names::UPLOADS_TOTAL, "outcome" => outcome).increment(1);
}

/// Refresh hub gauges.
pub fn set_hub_stats(stats: &HubStats) {
    gauge!(names::USERS_ONLINE).set(stats.identified as f64);
    gauge!(names::USERS_TYPING).set(stats.typing as f64);
    gauge!(names::BACKLOG_SIZE).set(stats.backlog as f64);
    counter!(names::EVENTS_DROPPED_TOTAL).absolute(stats.events_dropped);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Keeps the active-connection gauge in step with a socket's lifetime.
///
/// Created on upgrade, dropped when the connection task ends however it
/// ends.
pub struct ConnectionMetricsGuard {
    format: &'static str,
}

impl ConnectionMetricsGuard {
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        let format = format.as_str();
        record_connection(format);
        Self { format }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(self.format);
    }
}
