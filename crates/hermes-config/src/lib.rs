//! Typed configuration for Hermes.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict parsing (unknown fields are errors)
//! - Layered loading (defaults → file → env)
//!
//! # Configuration File Format
//!
//! ```toml
//! [bus]
//! servers = ["nats://127.0.0.1:4222"]
//! request_timeout_ms = 60000
//!
//! [gateway]
//! http_addr = "0.0.0.0:8080"
//! http_path = "/api"
//! ws_path = "/ws"
//! auth_subjects = ["auth.token"]
//! non_auth_subjects = ["public.status"]
//! namespace_subjects = ["orders.updates"]
//! namespace_subject = "tenant.lookup"
//!
//! [runtime]
//! shutdown_timeout_secs = 30
//!
//! [telemetry]
//! service_name = "orders"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any value can be overridden with `PREFIX__SECTION__KEY`; list values are
//! comma separated:
//!
//! - `HERMES__BUS__SERVERS=nats://a:4222,nats://b:4222`
//! - `HERMES__GATEWAY__WS_PATH=/socket`
//! - `HERMES__TELEMETRY__METRICS__ENABLED=false`

mod config;
mod error;
mod loader;
mod schema;

pub use config::HermesConfig;
pub use error::ConfigError;
pub use hermes_telemetry::LogFormat;
pub use loader::ConfigLoader;
pub use schema::{
    BusConfig, GatewayConfig, LoggingConfig, MetricsSection, RuntimeConfig,
    TelemetryConfigSection,
};
