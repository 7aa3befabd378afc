//! # Hermes Server
//!
//! Handler registration and the message runtime for Hermes.
//!
//! - [`Handler`] declares a subject, its stages, and its middleware
//! - [`HandlerRegistry`] binds subjects to composed pipelines
//! - [`Runtime`] connects to the bus, dispatches every inbound message in
//!   its own task, and replies through the [`ReplyDispatcher`]
//! - [`ShutdownSignal`] and [`InFlightTracker`] coordinate graceful stop
//!
//! ## Example
//!
//! ```rust,ignore
//! use hermes_server::{Handler, Runtime};
//! use hermes_nats::NatsConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::builder()
//!         .connector(NatsConnector::new(["nats://127.0.0.1:4222"]))
//!         .build()?;
//!
//!     runtime.register([Handler::new("echo")
//!         .handle(|ctx, req| Box::pin(async move { ctx.ok_with(req.body.clone()) }))])?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod handler;
mod reply;
mod runtime;
mod shutdown;

pub use error::RuntimeError;
pub use handler::{Handler, HandlerRegistry};
pub use reply::ReplyDispatcher;
pub use runtime::{Runtime, RuntimeBuilder, DEFAULT_SHUTDOWN_TIMEOUT};
pub use shutdown::{InFlightToken, InFlightTracker, ShutdownSignal};
