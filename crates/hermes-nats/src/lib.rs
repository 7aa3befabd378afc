//! # Hermes NATS
//!
//! [`Bus`] implementation over a NATS connection.
//!
//! ```rust,ignore
//! use hermes_nats::NatsConnector;
//! use hermes_server::Runtime;
//!
//! let connector = NatsConnector::new(["nats://127.0.0.1:4222"])
//!     .with_token("s3cret")
//!     .with_request_timeout(Duration::from_secs(5));
//! let runtime = Runtime::builder().connector(connector).build()?;
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-nats/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bus;
mod connector;

pub use bus::{NatsBus, NatsSubscription};
pub use connector::NatsConnector;
