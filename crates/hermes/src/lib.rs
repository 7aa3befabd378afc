//! # Hermes
//!
//! **Services on a message bus, one staged pipeline per subject**
//!
//! Hermes turns request/reply subjects on NATS into handlers:
//!
//! - **Staged pipeline** – validate, authorize and handle run in a fixed order
//! - **Middleware hooks** – before and after each stage, onion-ordered
//! - **Uniform errors** – every failure becomes a `{code, body}` envelope
//! - **Services** – shared state resolved by type or by name from any stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hermes::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::builder()
//!         .connector(NatsConnector::new(["nats://127.0.0.1:4222"]))
//!         .build()?;
//!
//!     runtime.register([Handler::new("echo")
//!         .validate(|ctx, req| Box::pin(async move {
//!             match req.body {
//!                 Some(_) => ctx.ok(),
//!                 None => ctx.error(status::BAD_REQUEST, "body required"),
//!             }
//!         }))
//!         .handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }))])?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! before_all → before_validate → validate → after_validate
//!   → before_authorize → authorize → after_authorize
//!   → before_handle → handle → after_handle → after_all → reply
//! ```

#![doc(html_root_url = "https://docs.rs/hermes/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use hermes_core as core;

// Re-export middleware types
pub use hermes_middleware as middleware;

// Re-export runtime types
pub use hermes_server as server;

// Re-export the NATS transport
pub use hermes_nats as nats;

// Re-export configuration
pub use hermes_config as config;

// Re-export telemetry
pub use hermes_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use hermes::prelude::*;
/// ```
pub mod prelude {
    pub use hermes_core::{
        status, AfterContext, AuthorizationContext, BeforeContext, Bus, BusClient, BusError,
        HandleContext, Headers, LogService, Outcome, Rejection, Request, Response, StageError,
        StageResult, ValidationContext,
    };

    // Middleware
    pub use hermes_middleware::{
        Collapsed, Hook, HookSet, InitContext, Middleware, MiddlewareFactory, SimpleMiddleware,
    };

    // Runtime
    pub use hermes_server::{Handler, Runtime, RuntimeBuilder, RuntimeError, ShutdownSignal};

    pub use hermes_nats::NatsConnector;

    pub use hermes_config::{ConfigLoader, HermesConfig};
}
