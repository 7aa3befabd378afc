//! Test error types.

use hermes_core::BusError;
use hermes_gateway::GatewayError;
use hermes_server::RuntimeError;
use hermes_ws::WsError;
use thiserror::Error;

/// Errors that can occur during testing.
#[derive(Debug, Error)]
pub enum TestError {
    /// The runtime failed to start or stop.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// A bus call failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The gateway failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// A WebSocket operation failed.
    #[error("websocket error: {0}")]
    Ws(#[from] WsError),

    /// The HTTP exchange failed.
    #[error("http error: {0}")]
    Http(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nothing arrived in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Socket IO failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestError {
    pub(crate) fn http(err: impl std::fmt::Display) -> Self {
        Self::Http(err.to_string())
    }
}
