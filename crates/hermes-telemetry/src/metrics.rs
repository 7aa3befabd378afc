//! Prometheus metrics.
//!
//! The recorder is installed without an HTTP listener; the gateway serves
//! [`render_metrics`] on its own `/metrics` route.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const MESSAGES_TOTAL: &str = "hermes_messages_total";
const MESSAGE_DURATION: &str = "hermes_message_duration_seconds";
const IN_FLIGHT: &str = "hermes_in_flight_messages";
const GATEWAY_HTTP_REQUESTS: &str = "hermes_gateway_http_requests_total";
const GATEWAY_WS_CONNECTIONS: &str = "hermes_gateway_ws_connections";
const GATEWAY_SUBSCRIPTIONS: &str = "hermes_gateway_subscriptions";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder.
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Installs the global Prometheus recorder.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if another recorder is installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(MESSAGES_TOTAL, "Messages processed by the runtime");
    describe_histogram!(MESSAGE_DURATION, "Pipeline duration in seconds");
    describe_gauge!(IN_FLIGHT, "Messages currently being processed");
    describe_counter!(GATEWAY_HTTP_REQUESTS, "HTTP calls answered by the gateway");
    describe_gauge!(GATEWAY_WS_CONNECTIONS, "Open gateway WebSocket connections");
    describe_gauge!(GATEWAY_SUBSCRIPTIONS, "Active gateway subscriptions");
}

/// Records a processed message.
pub fn record_message(subject: &str, code: u16, duration: Duration) {
    counter!(
        MESSAGES_TOTAL,
        "subject" => subject.to_string(),
        "code" => code.to_string()
    )
    .increment(1);

    histogram!(MESSAGE_DURATION, "subject" => subject.to_string())
        .record(duration.as_secs_f64());
}

/// Records an HTTP call answered by the gateway.
pub fn record_gateway_request(code: u16) {
    counter!(GATEWAY_HTTP_REQUESTS, "code" => code.to_string()).increment(1);
}

/// Tracks an open WebSocket connection.
pub fn ws_connection_opened() {
    gauge!(GATEWAY_WS_CONNECTIONS).increment(1.0);
}

/// Untracks a closed WebSocket connection.
pub fn ws_connection_closed() {
    gauge!(GATEWAY_WS_CONNECTIONS).decrement(1.0);
}

/// Tracks a new subscription.
pub fn subscription_added() {
    gauge!(GATEWAY_SUBSCRIPTIONS).increment(1.0);
}

/// Untracks a removed subscription.
pub fn subscription_removed() {
    gauge!(GATEWAY_SUBSCRIPTIONS).decrement(1.0);
}

/// Keeps `hermes_in_flight_messages` raised while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT).decrement(1.0);
    }
}
