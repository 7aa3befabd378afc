//! The root configuration type.

use hermes_core::subject;
use hermes_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::{BusConfig, ConfigError, GatewayConfig, RuntimeConfig, TelemetryConfigSection};

/// Complete Hermes configuration.
///
/// Services read `bus`, `runtime`, and `telemetry`; the gateway binary also
/// reads `gateway`.
///
/// # Example
///
/// ```
/// use hermes_config::HermesConfig;
///
/// let config = HermesConfig::default();
/// assert_eq!(config.gateway.http_addr, "0.0.0.0:8080");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct HermesConfig {
    /// Message bus connection.
    #[serde(default)]
    pub bus: BusConfig,

    /// Gateway endpoints and authorization subjects.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Service runtime.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl HermesConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` or `ConfigError::ValidationError`
    /// describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.servers.is_empty() || self.bus.servers.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::invalid_value(
                "bus.servers",
                "at least one non-empty server URL is required",
            ));
        }
        if self.bus.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "bus.request_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.runtime.shutdown_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "runtime.shutdown_timeout_secs",
                "must be greater than zero",
            ));
        }

        let gateway = &self.gateway;
        if gateway.http_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "gateway.http_addr",
                format!("invalid socket address: {}", gateway.http_addr),
            ));
        }
        for (field, path) in [
            ("gateway.http_path", &gateway.http_path),
            ("gateway.ws_path", &gateway.ws_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid_value(field, "must start with '/'"));
            }
        }
        if gateway.http_path == gateway.ws_path {
            return Err(ConfigError::validation_error(
                "gateway.http_path and gateway.ws_path must differ",
            ));
        }
        if gateway.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "gateway.max_body_bytes",
                "must be greater than zero",
            ));
        }
        if !gateway.namespace_subjects.is_empty() && gateway.namespace_subject.is_none() {
            return Err(ConfigError::validation_error(
                "gateway.namespace_subject must be set when gateway.namespace_subjects is not empty",
            ));
        }

        for (field, subjects) in [
            ("gateway.auth_subjects", &gateway.auth_subjects),
            ("gateway.non_auth_subjects", &gateway.non_auth_subjects),
            ("gateway.namespace_subjects", &gateway.namespace_subjects),
        ] {
            check_subjects(field, subjects.iter().map(String::as_str))?;
        }
        check_subjects("gateway.namespace_subject", gateway.namespace_subject.as_deref())?;

        Ok(())
    }

    /// Local development preset: pretty debug logs.
    ///
    /// # Example
    ///
    /// ```
    /// use hermes_config::HermesConfig;
    ///
    /// let config = HermesConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.runtime.shutdown_timeout_secs = 5;
        config
    }

    /// Production preset: JSON info logs.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config
    }
}

fn check_subjects<'a>(
    field: &str,
    subjects: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    match subjects.into_iter().find(|s| !subject::is_valid(s)) {
        Some(bad) => Err(ConfigError::invalid_value(
            field,
            format!("invalid subject: {bad:?}"),
        )),
        None => Ok(()),
    }
}
