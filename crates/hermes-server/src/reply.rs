//! Reply dispatch.

use hermes_core::{BusClient, BusError, Response};

/// Sends a message's single reply.
///
/// A dispatcher is created per inbound message and consumed by
/// [`send`](Self::send), so a message can never be answered twice.
/// Messages without a reply address are fire-and-forget.
#[derive(Debug)]
#[must_use = "a reply dispatcher does nothing until `send` is called"]
pub struct ReplyDispatcher {
    client: BusClient,
    reply: Option<String>,
}

impl ReplyDispatcher {
    /// Creates the dispatcher for a message with the given reply address.
    pub fn new(client: BusClient, reply: Option<String>) -> Self {
        Self { client, reply }
    }

    /// Returns `true` if the sender expects a reply.
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Publishes `response` to the reply address.
    ///
    /// Returns `Ok(false)` when there was no address to reply to.
    pub async fn send(self, response: &Response) -> Result<bool, BusError> {
        match &self.reply {
            Some(reply) => {
                self.client.publish_response(reply, response).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use hermes_core::{codec, Bus, MemoryBus};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sends_to_reply_address() {
        let bus = MemoryBus::new();
        let mut inbox = bus.subscribe("_INBOX.test").await.unwrap();
        let client = BusClient::new(Arc::new(bus.clone()));

        let dispatcher = ReplyDispatcher::new(client, Some("_INBOX.test".into()));
        assert!(dispatcher.expects_reply());
        let sent = dispatcher
            .send(&Response::error(403, json!({ "message": "forbidden" })))
            .await
            .unwrap();
        assert!(sent);

        let message = inbox.next().await.unwrap();
        let response = codec::decode_response(&message.payload).unwrap().unwrap();
        assert_eq!(response.code, 403);
    }

    #[tokio::test]
    async fn test_no_reply_address_publishes_nothing() {
        let bus = MemoryBus::new();
        let client = BusClient::new(Arc::new(bus.clone()));
        let sent = ReplyDispatcher::new(client, None)
            .send(&Response::ok(Default::default(), None))
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(bus.published("_INBOX.test"), 0);
    }
}
