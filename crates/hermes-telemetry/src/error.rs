//! Telemetry errors.

use thiserror::Error;

/// Failure to install a global recorder or subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder not installed: {0}")]
    MetricsInit(String),

    /// The tracing subscriber could not be installed, or the filter is bad.
    #[error("log subscriber not installed: {0}")]
    LoggingInit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("recorder already set".to_string());
        assert_eq!(err.to_string(), "metrics recorder not installed: recorder already set");
    }
}
