//! Configuration sections.

use std::time::Duration;

use hermes_telemetry::{LogConfig, LogFormat, MetricsConfig};
use serde::{Deserialize, Serialize};

/// Message bus connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Server URLs, tried in order.
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,

    /// User name for user/password auth.
    #[serde(default)]
    pub user: Option<String>,

    /// Password for user/password auth.
    #[serde(default)]
    pub password: Option<String>,

    /// Token auth.
    #[serde(default)]
    pub token: Option<String>,

    /// Path to a `.creds` file.
    #[serde(default)]
    pub credentials_path: Option<String>,

    /// Default request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            user: None,
            password: None,
            token: None,
            credentials_path: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BusConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_servers() -> Vec<String> {
    vec!["nats://127.0.0.1:4222".to_string()]
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP listen address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Path of the HTTP request endpoint.
    #[serde(default = "default_http_path")]
    pub http_path: String,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Subjects every WebSocket subscribe and HTTP call is authorized
    /// against, in order.
    #[serde(default)]
    pub auth_subjects: Vec<String>,

    /// Subjects that skip authorization.
    #[serde(default)]
    pub non_auth_subjects: Vec<String>,

    /// Subjects whose subscriptions are scoped by a namespace.
    #[serde(default)]
    pub namespace_subjects: Vec<String>,

    /// Subject answering namespace lookups.
    #[serde(default)]
    pub namespace_subject: Option<String>,

    /// Largest accepted HTTP body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            http_path: default_http_path(),
            ws_path: default_ws_path(),
            auth_subjects: Vec::new(),
            non_auth_subjects: Vec::new(),
            namespace_subjects: Vec::new(),
            namespace_subject: None,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_path() -> String {
    "/api".to_string()
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Service runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// How long `stop` waits for in-flight messages.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl RuntimeConfig {
    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name attached to startup logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl TelemetryConfigSection {
    /// Converts to the telemetry crate's settings.
    pub fn to_telemetry(&self) -> hermes_telemetry::TelemetryConfig {
        let mut logging = match self.logging.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        logging.level.clone_from(&self.logging.level);
        hermes_telemetry::TelemetryConfig {
            logging,
            metrics: MetricsConfig {
                enabled: self.metrics.enabled,
            },
        }
    }
}

fn default_service_name() -> String {
    "hermes".to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Json,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Whether to record and serve metrics.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}
