//! WebSocket support for the Hermes gateway.
//!
//! - RFC 6455 upgrade validation and `Sec-WebSocket-Accept` computation
//! - [`WsSocket`], a framed socket over any upgraded IO with automatic pongs
//! - [`WsSender`], a cloneable send half for pushing frames from other tasks
//!
//! # Example
//!
//! ```ignore
//! use hermes_ws::{upgrade, WsConfig, WsSocket, Message};
//!
//! if upgrade::is_websocket_request(&request) {
//!     let response = upgrade::upgrade_response(&request)?;
//!     tokio::spawn(async move {
//!         let io = TokioIo::new(hyper::upgrade::on(request).await?);
//!         let mut socket = WsSocket::accept(io, &WsConfig::default()).await;
//!         while let Some(Ok(Message::Text(text))) = socket.recv().await {
//!             socket.sender().send_text(text).await?;
//!         }
//!     });
//!     return Ok(response);
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-ws/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod message;
pub mod socket;
pub mod upgrade;

pub use error::{WsError, WsResult};
pub use message::Message;
pub use socket::{ConnectionId, WsConfig, WsSender, WsSocket};
pub use tungstenite::protocol::Role;
