//! In-process bus.
//!
//! Subjects match exactly (no wildcards). Requests use a private
//! `_INBOX.<uuid>` subscription for the reply, mirroring how brokers route
//! request/reply.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bus::{BoxFuture, BoxSubscription, Bus, BusConnector, BusError, BusMessage, Subscription};

type Sender = mpsc::UnboundedSender<BusMessage>;

/// Reply inboxes are one-shot and are left out of the counters.
const INBOX_PREFIX: &str = "_INBOX.";

fn counted(subject: &str) -> bool {
    !subject.starts_with(INBOX_PREFIX)
}

#[derive(Default)]
struct Table {
    subscribers: HashMap<String, Vec<(u64, Sender)>>,
    subscribe_calls: HashMap<String, usize>,
    published: HashMap<String, usize>,
}

#[derive(Default)]
struct Shared {
    table: Mutex<Table>,
    next_id: AtomicU64,
}

impl Shared {
    fn remove(&self, subject: &str, id: u64) {
        let mut table = self.table.lock();
        if let Some(list) = table.subscribers.get_mut(subject) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                table.subscribers.remove(subject);
            }
        }
    }

    fn deliver(&self, message: &BusMessage) -> usize {
        let mut table = self.table.lock();
        if counted(&message.subject) {
            *table.published.entry(message.subject.clone()).or_default() += 1;
        }
        let Some(list) = table.subscribers.get_mut(&message.subject) else {
            return 0;
        };
        list.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        list.len()
    }
}

/// An in-memory [`Bus`].
///
/// Clones share the same subscription table, so a test can hand one clone to
/// a runtime and another to a gateway.
///
/// # Example
///
/// ```
/// use futures_util::StreamExt;
/// use hermes_core::{Bus, MemoryBus};
///
/// # tokio_test::block_on(async {
/// let bus = MemoryBus::new();
/// let mut sub = bus.subscribe("ping").await.unwrap();
/// bus.publish("ping", "hello".into()).await.unwrap();
/// assert_eq!(sub.next().await.unwrap().payload, "hello");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.shared
            .table
            .lock()
            .subscribers
            .get(subject)
            .map_or(0, Vec::len)
    }

    /// Number of times `subscribe` was called for `subject`.
    pub fn subscribe_calls(&self, subject: &str) -> usize {
        self.shared
            .table
            .lock()
            .subscribe_calls
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    /// Number of messages published on `subject`.
    ///
    /// Replies to `_INBOX.` subjects are not counted.
    pub fn published(&self, subject: &str) -> usize {
        self.shared
            .table
            .lock()
            .published
            .get(subject)
            .copied()
            .unwrap_or(0)
    }

    /// Publishes a message carrying a reply address.
    pub fn publish_with_reply(&self, subject: &str, reply: &str, payload: Bytes) {
        self.shared
            .deliver(&BusMessage::new(subject, payload).with_reply(reply));
    }

    fn open(&self, subject: &str) -> MemorySubscription {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.shared.table.lock();
        if counted(subject) {
            *table.subscribe_calls.entry(subject.to_string()).or_default() += 1;
        }
        table
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        MemorySubscription {
            id,
            subject: subject.to_string(),
            receiver: rx,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.shared.table.lock();
        f.debug_struct("MemoryBus")
            .field("subjects", &table.subscribers.len())
            .finish()
    }
}

impl Bus for MemoryBus {
    fn subscribe<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, Result<BoxSubscription, BusError>> {
        let subscription: BoxSubscription = Box::new(self.open(subject));
        Box::pin(async move { Ok(subscription) })
    }

    fn publish<'a>(&'a self, subject: &'a str, payload: Bytes) -> BoxFuture<'a, Result<(), BusError>> {
        self.shared.deliver(&BusMessage::new(subject, payload));
        Box::pin(async { Ok(()) })
    }

    fn request<'a>(
        &'a self,
        subject: &'a str,
        payload: Bytes,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<BusMessage, BusError>> {
        Box::pin(async move {
            let inbox = format!("{INBOX_PREFIX}{}", uuid::Uuid::now_v7().simple());
            let mut reply = self.open(&inbox);
            let delivered = self
                .shared
                .deliver(&BusMessage::new(subject, payload).with_reply(inbox.clone()));
            if delivered == 0 {
                return Err(BusError::NoResponders(subject.to_string()));
            }
            match tokio::time::timeout(timeout, reply.next()).await {
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(BusError::Other(format!("reply inbox for '{subject}' closed"))),
                Err(_) => Err(BusError::timeout(subject, timeout)),
            }
        })
    }

    fn drain(&self) -> BoxFuture<'_, Result<(), BusError>> {
        self.shared.table.lock().subscribers.clear();
        Box::pin(async { Ok(()) })
    }
}

impl BusConnector for MemoryBus {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn Bus>, BusError>> {
        let bus: Arc<dyn Bus> = Arc::new(self.clone());
        Box::pin(async move { Ok(bus) })
    }
}

/// Subscription handed out by [`MemoryBus`].
pub struct MemorySubscription {
    id: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
    shared: Arc<Shared>,
}

impl Stream for MemorySubscription {
    type Item = BusMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Subscription for MemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn unsubscribe(&mut self) -> BoxFuture<'_, Result<(), BusError>> {
        self.shared.remove(&self.subject, self.id);
        self.receiver.close();
        Box::pin(async { Ok(()) })
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.shared.remove(&self.subject, self.id);
    }
}
