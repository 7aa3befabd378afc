//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file {} does not exist", path.display())]
    FileNotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {}", path.display())]
    ReadError {
        /// Path of the file.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Neither `.toml` nor `.json`.
    #[error("unsupported config format `{0}` (expected toml or json)")]
    UnsupportedFormat(String),

    /// Malformed TOML.
    #[error("invalid TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Malformed JSON.
    #[error("invalid JSON config: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The `.env` file exists but is malformed.
    #[error("invalid .env file: {0}")]
    Dotenv(String),

    /// A single field holds an unacceptable value.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted field path, e.g. `gateway.ws_path`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A `HERMES__...` override could not be applied.
    #[error("environment override {var}: {reason}")]
    EnvParseError {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Fields are individually fine but conflict with each other.
    #[error("inconsistent config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// [`ConfigError::FileNotFound`] for `path`.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// [`ConfigError::ReadError`] for `path`.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// [`ConfigError::UnsupportedFormat`].
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// [`ConfigError::InvalidValue`] for `field`.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// [`ConfigError::EnvParseError`] for `var`.
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// [`ConfigError::ValidationError`].
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = ConfigError::file_not_found("/etc/hermes/hermes.toml");
        assert_eq!(err.to_string(), "config file /etc/hermes/hermes.toml does not exist");

        let err = ConfigError::invalid_value("gateway.http_path", "must start with '/'");
        assert_eq!(err.to_string(), "gateway.http_path: must start with '/'");

        let err = ConfigError::env_parse_error("HERMES__RUNTIME__SHUTDOWN_TIMEOUT_SECS", "expected integer");
        assert!(err.to_string().starts_with("environment override HERMES__RUNTIME__SHUTDOWN_TIMEOUT_SECS"));
    }

    #[test]
    fn test_unsupported_format() {
        let err = ConfigError::unsupported_format("yaml");
        assert!(matches!(&err, ConfigError::UnsupportedFormat(f) if f == "yaml"));
        assert!(err.to_string().contains("expected toml or json"));
    }
}
