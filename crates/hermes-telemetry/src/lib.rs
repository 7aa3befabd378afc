//! Observability for Hermes services.
//!
//! - **Logging**: `tracing-subscriber` with JSON or pretty output
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hermes_messages_total` | Counter | `subject`, `code` | Messages processed by the runtime |
//! | `hermes_message_duration_seconds` | Histogram | `subject` | Pipeline latency |
//! | `hermes_in_flight_messages` | Gauge | - | Messages currently in a pipeline |
//! | `hermes_gateway_http_requests_total` | Counter | `code` | Gateway HTTP calls |
//! | `hermes_gateway_ws_connections` | Gauge | - | Open WebSocket connections |
//! | `hermes_gateway_subscriptions` | Gauge | - | Active per-connection subscriptions |
//!
//! Recording functions are no-ops until a recorder is installed, so library
//! code can call them unconditionally.
//!
//! # Example
//!
//! ```rust,ignore
//! use hermes_telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::default())?;
//! tracing::info!(subject = "orders.create", "listening");
//! ```

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{
    init_metrics, record_gateway_request, record_message, render_metrics, subscription_added,
    subscription_removed, ws_connection_closed, ws_connection_opened, InFlightGuard, MetricsConfig,
};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Logging and metrics settings together.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Logging settings.
    pub logging: LogConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
}

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns [`TelemetryError`] if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    #[test]
    fn test_recorders_reachable_from_crate_root() {
        crate::record_message("orders.create", 200, Duration::from_millis(1));
        crate::record_gateway_request(200);
        crate::ws_connection_opened();
        crate::ws_connection_closed();
        crate::subscription_added();
        crate::subscription_removed();
        drop(crate::InFlightGuard::new());
    }
}
