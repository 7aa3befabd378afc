//! # Hermes Gateway
//!
//! Exposes the Hermes bus to browser clients.
//!
//! - **HTTP**: `POST` with a `nats-subject` header becomes a bus request;
//!   the reply comes back as `{code, body}`
//! - **WebSocket**: clients send `{subject, action}` frames and receive
//!   `{subject, code, body}` for every event on subscribed subjects
//! - **Auth chain**: configured auth subjects vet each request in order,
//!   threading headers from one step to the next
//! - **Namespaces**: subscriptions to namespaced subjects are scoped by a
//!   suffix looked up per connection
//!
//! One broker subscription serves every connection following a subject;
//! see [`SubscriptionManager`].

#![doc(html_root_url = "https://docs.rs/hermes-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod http;
pub mod protocol;
pub mod resolver;
pub mod server;
pub mod session;
pub mod subscription;

pub use error::{GatewayError, GatewayResult};
pub use http::HttpGateway;
pub use protocol::{Action, ClientFrame, HttpReply, ServerFrame, SUBJECT_HEADER, TRACE_ID_HEADER};
pub use resolver::{Resolved, Resolver, ResolverConfig};
pub use server::Gateway;
pub use session::Session;
pub use subscription::{OnHandle, SubscriptionKey, SubscriptionManager};

use hermes_config::BusConfig;
use hermes_nats::NatsConnector;

/// Gateway version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builds a NATS connector from bus settings.
pub fn nats_connector(config: &BusConfig) -> NatsConnector {
    let mut connector = NatsConnector::new(config.servers.iter().cloned())
        .with_name("hermes-gateway")
        .with_request_timeout(config.request_timeout());
    if let Some(path) = &config.credentials_path {
        connector = connector.with_credentials_file(path);
    }
    if let Some(token) = &config.token {
        connector = connector.with_token(token.clone());
    }
    if let (Some(user), Some(password)) = (&config.user, &config.password) {
        connector = connector.with_user_and_password(user.clone(), password.clone());
    }
    connector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_connector_from_config() {
        let config = BusConfig {
            servers: vec!["nats://a:4222".into(), "nats://b:4222".into()],
            ..BusConfig::default()
        };
        let connector = nats_connector(&config);
        assert_eq!(connector.servers(), ["nats://a:4222", "nats://b:4222"]);
    }
}
