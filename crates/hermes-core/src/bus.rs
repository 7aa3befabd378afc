//! The abstract messaging capability.
//!
//! Hermes never talks to a broker directly. Runtimes and gateways hold an
//! `Arc<dyn Bus>` and a [`BusConnector`] produces one at start-up, so tests can
//! swap the broker for [`MemoryBus`](crate::MemoryBus).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::envelope::{Request, Response};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default timeout for outbound requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload.
    pub payload: Bytes,
    /// Reply address, when the sender expects an answer.
    pub reply: Option<String>,
}

impl BusMessage {
    /// Creates a message without a reply address.
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
        }
    }

    /// Sets the reply address.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}

/// Errors raised by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the broker.
    #[error("bus connection failed: {0}")]
    Connect(String),

    /// Subscribing failed.
    #[error("subscribe to '{subject}' failed: {reason}")]
    Subscribe {
        /// Subject being subscribed.
        subject: String,
        /// Broker-provided reason.
        reason: String,
    },

    /// Publishing failed.
    #[error("publish to '{subject}' failed: {reason}")]
    Publish {
        /// Target subject.
        subject: String,
        /// Broker-provided reason.
        reason: String,
    },

    /// A request received no reply in time.
    #[error("request to '{subject}' timed out after {timeout:?}")]
    Timeout {
        /// Target subject.
        subject: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// No subscriber exists for the requested subject.
    #[error("no responders for '{0}'")]
    NoResponders(String),

    /// The reply carried no payload.
    #[error("empty reply from '{0}'")]
    EmptyReply(String),

    /// Encoding or decoding an envelope failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Anything else the broker reports.
    #[error("bus error: {0}")]
    Other(String),
}

impl BusError {
    /// Creates a subscribe error.
    pub fn subscribe(subject: impl Into<String>, reason: impl ToString) -> Self {
        Self::Subscribe {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a publish error.
    pub fn publish(subject: impl Into<String>, reason: impl ToString) -> Self {
        Self::Publish {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(subject: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            subject: subject.into(),
            timeout,
        }
    }
}

/// A live subscription: a stream of messages for one subject.
///
/// The stream ends when the subscription is unsubscribed or the bus drains.
pub trait Subscription: Stream<Item = BusMessage> + Send + Unpin {
    /// Subject this subscription listens on.
    fn subject(&self) -> &str;

    /// Removes the subscription from the broker.
    fn unsubscribe(&mut self) -> BoxFuture<'_, Result<(), BusError>>;
}

/// A type-erased subscription.
pub type BoxSubscription = Box<dyn Subscription>;

/// Publish/subscribe/request primitives.
pub trait Bus: Send + Sync + 'static {
    /// Subscribes to `subject`.
    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<BoxSubscription, BusError>>;

    /// Publishes `payload` on `subject` without expecting a reply.
    fn publish<'a>(&'a self, subject: &'a str, payload: Bytes) -> BoxFuture<'a, Result<(), BusError>>;

    /// Publishes `payload` and waits up to `timeout` for a single reply.
    fn request<'a>(
        &'a self,
        subject: &'a str,
        payload: Bytes,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<BusMessage, BusError>>;

    /// Flushes pending messages.
    ///
    /// Subscriptions are released by their owners through
    /// [`Subscription::unsubscribe`] or by dropping them. A bus may close
    /// subscriptions that are still open, but callers must not rely on it.
    fn drain(&self) -> BoxFuture<'_, Result<(), BusError>>;
}

/// Produces a connected bus.
pub trait BusConnector: Send + Sync + 'static {
    /// Connects to the broker.
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn Bus>, BusError>>;
}

/// Envelope-level bus access.
///
/// Wraps a bus with a default request timeout and the JSON codec.
///
/// # Example
///
/// ```rust,ignore
/// let client = BusClient::new(bus);
/// let response = client.request("users.get", &Request::new(json!({"id": 1}))).await?;
/// assert_eq!(response.code, 200);
/// ```
#[derive(Clone)]
pub struct BusClient {
    bus: Arc<dyn Bus>,
    timeout: Duration,
}

impl BusClient {
    /// Creates a client using [`DEFAULT_REQUEST_TIMEOUT`].
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying bus.
    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// Sends a request envelope and decodes the response envelope.
    pub async fn request(&self, subject: &str, request: &Request) -> Result<Response, BusError> {
        self.request_with_timeout(subject, request, self.timeout).await
    }

    /// Like [`request`](Self::request) with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        subject: &str,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, BusError> {
        let payload = codec::encode_request(request)?;
        let reply = self.bus.request(subject, payload, timeout).await?;
        codec::decode_response(&reply.payload)?
            .ok_or_else(|| BusError::EmptyReply(subject.to_string()))
    }

    /// Publishes a request envelope without waiting.
    pub async fn publish(&self, subject: &str, request: &Request) -> Result<(), BusError> {
        let payload = codec::encode_request(request)?;
        self.bus.publish(subject, payload).await
    }

    /// Publishes a response envelope, typically to a reply address or an event subject.
    pub async fn publish_response(&self, subject: &str, response: &Response) -> Result<(), BusError> {
        let payload = codec::encode_response(response)?;
        self.bus.publish(subject, payload).await
    }
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
