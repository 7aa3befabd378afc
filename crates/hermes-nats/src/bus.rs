//! [`Bus`] over an `async_nats::Client`.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_nats::{Client, RequestErrorKind, Subscriber};
use bytes::Bytes;
use futures_util::Stream;
use hermes_core::{BoxFuture, BoxSubscription, Bus, BusError, BusMessage, Subscription};

/// A connected NATS bus.
#[derive(Clone, Debug)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Wraps an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn to_bus_message(message: async_nats::Message) -> BusMessage {
    BusMessage {
        subject: message.subject.to_string(),
        payload: message.payload,
        reply: message.reply.map(|reply| reply.to_string()),
    }
}

impl Bus for NatsBus {
    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<BoxSubscription, BusError>> {
        Box::pin(async move {
            let subscriber = self
                .client
                .subscribe(subject.to_string())
                .await
                .map_err(|err| BusError::subscribe(subject, err))?;
            tracing::debug!(subject, "subscribed");
            let subscription: BoxSubscription = Box::new(NatsSubscription {
                subject: subject.to_string(),
                inner: subscriber,
            });
            Ok(subscription)
        })
    }

    fn publish<'a>(&'a self, subject: &'a str, payload: Bytes) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            self.client
                .publish(subject.to_string(), payload)
                .await
                .map_err(|err| BusError::publish(subject, err))
        })
    }

    fn request<'a>(
        &'a self,
        subject: &'a str,
        payload: Bytes,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<BusMessage, BusError>> {
        Box::pin(async move {
            let request = self.client.request(subject.to_string(), payload);
            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(message)) => Ok(to_bus_message(message)),
                Ok(Err(err)) => Err(match err.kind() {
                    RequestErrorKind::NoResponders => BusError::NoResponders(subject.to_string()),
                    RequestErrorKind::TimedOut => BusError::timeout(subject, timeout),
                    _ => BusError::Other(format!("request to '{subject}' failed: {err}")),
                }),
                Err(_) => Err(BusError::timeout(subject, timeout)),
            }
        })
    }

    // Only flushes. Subscribers are closed by whoever holds them.
    fn drain(&self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            self.client
                .flush()
                .await
                .map_err(|err| BusError::Other(format!("flush failed: {err}")))
        })
    }
}

/// A NATS subscriber as a [`Subscription`].
pub struct NatsSubscription {
    subject: String,
    inner: Subscriber,
}

impl Stream for NatsSubscription {
    type Item = BusMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|message| message.map(to_bus_message))
    }
}

impl Subscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn unsubscribe(&mut self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            self.inner
                .unsubscribe()
                .await
                .map_err(|err| BusError::subscribe(self.subject.clone(), err))
        })
    }
}

impl std::fmt::Debug for NatsSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsSubscription")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
