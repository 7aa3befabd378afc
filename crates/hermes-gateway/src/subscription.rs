//! Gateway subscription multiplexing.
//!
//! Many WebSocket connections may follow the same subject. The manager keeps
//! exactly one broker subscription per [`SubscriptionKey`] and fans every
//! event out to the connections registered under it.
//!
//! Subscribe and unsubscribe operations for one key are processed by a
//! dedicated worker task in arrival order, so the broker subscription for a
//! key is opened once and closed exactly when its last subscriber leaves.
//! Operations on different keys never wait on each other.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use hermes_core::subject::namespaced;
use hermes_core::{status, BoxSubscription, Bus, BusError};
use hermes_ws::ConnectionId;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::protocol::ServerFrame;

/// Callback receiving the frames destined for one connection.
///
/// Called synchronously from the fan-out loop; it should hand the frame off
/// (for example into a channel) rather than block.
pub type OnHandle = Arc<dyn Fn(&ServerFrame) -> anyhow::Result<()> + Send + Sync>;

type Entries = Arc<RwLock<HashMap<ConnectionId, OnHandle>>>;

/// A subject, optionally scoped by a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    subject: String,
    namespace: Option<String>,
}

impl SubscriptionKey {
    /// Creates a key. An empty namespace is treated as none.
    pub fn new(subject: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            subject: subject.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }

    /// The client-facing subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The subject subscribed to on the broker: `subject` or `subject.namespace`.
    pub fn bus_subject(&self) -> String {
        namespaced(&self.subject, self.namespace())
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bus_subject())
    }
}

enum Op {
    Subscribe {
        connection: ConnectionId,
        on_handle: OnHandle,
        done: oneshot::Sender<Result<(), BusError>>,
    },
    Unsubscribe {
        connection: ConnectionId,
        done: oneshot::Sender<Result<bool, BusError>>,
    },
}

struct Inner {
    bus: Arc<dyn Bus>,
    queues: Mutex<HashMap<SubscriptionKey, mpsc::UnboundedSender<Op>>>,
    records: DashMap<SubscriptionKey, Entries>,
    connections: DashMap<ConnectionId, HashSet<SubscriptionKey>>,
}

impl Inner {
    fn index(&self, connection: ConnectionId, key: &SubscriptionKey) {
        self.connections
            .entry(connection)
            .or_default()
            .insert(key.clone());
    }

    fn unindex(&self, connection: ConnectionId, key: &SubscriptionKey) {
        if let Some(mut keys) = self.connections.get_mut(&connection) {
            keys.remove(key);
        }
        self.connections.remove_if(&connection, |_, keys| keys.is_empty());
    }
}

/// Shared subscription table for every gateway connection.
///
/// Clones share the same table.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Creates a manager subscribing through `bus`.
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                queues: Mutex::new(HashMap::new()),
                records: DashMap::new(),
                connections: DashMap::new(),
            }),
        }
    }

    /// Registers `connection` under `key`.
    ///
    /// The first subscriber of a key opens the broker subscription.
    /// Subscribing a connection twice replaces its callback.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        key: &SubscriptionKey,
        on_handle: OnHandle,
    ) -> Result<(), BusError> {
        let (done, rx) = oneshot::channel();
        self.enqueue(
            key,
            Op::Subscribe {
                connection,
                on_handle,
                done,
            },
        );
        rx.await.unwrap_or_else(|_| Err(worker_gone(key)))
    }

    /// Removes `connection` from `key`.
    ///
    /// Returns `false` if the connection was not subscribed. The last
    /// subscriber leaving closes the broker subscription.
    pub async fn unsubscribe(&self, connection: ConnectionId, key: &SubscriptionKey) -> Result<bool, BusError> {
        let (done, rx) = oneshot::channel();
        self.enqueue(key, Op::Unsubscribe { connection, done });
        rx.await.unwrap_or_else(|_| Err(worker_gone(key)))
    }

    /// Removes `connection` from every key it follows.
    ///
    /// Returns the number of keys it was removed from. Failures to close a
    /// broker subscription are logged and do not stop the sweep.
    pub async fn unsubscribe_all_subjects(&self, connection: ConnectionId) -> usize {
        let keys = self
            .inner
            .connections
            .remove(&connection)
            .map(|(_, keys)| keys)
            .unwrap_or_default();

        let mut removed = 0;
        for key in keys {
            match self.unsubscribe(connection, &key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(%connection, key = %key, error = %err, "failed to release subscription");
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Keys that currently have at least one subscriber.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .inner
            .records
            .iter()
            .filter(|record| !record.value().read().is_empty())
            .map(|record| record.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of connections subscribed under `key`.
    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .records
            .get(key)
            .map_or(0, |record| record.read().len())
    }

    /// Keys `connection` is subscribed under.
    pub fn subjects_of(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .inner
            .connections
            .get(&connection)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn enqueue(&self, key: &SubscriptionKey, op: Op) {
        let mut queues = self.inner.queues.lock();
        let op = match queues.get(key) {
            Some(queue) => match queue.send(op) {
                Ok(()) => return,
                Err(mpsc::error::SendError(op)) => op,
            },
            None => op,
        };

        let (queue, rx) = mpsc::unbounded_channel();
        if queue.send(op).is_err() {
            return;
        }
        queues.insert(key.clone(), queue);
        drop(queues);

        let worker = Worker {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            entries: Arc::default(),
            pump: None,
        };
        tokio::spawn(worker.run(rx));
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("keys", &self.keys())
            .field("connections", &self.inner.connections.len())
            .finish()
    }
}

fn worker_gone(key: &SubscriptionKey) -> BusError {
    BusError::Other(format!("subscription worker for '{key}' stopped"))
}

/// Serializes every operation on one key.
struct Worker {
    inner: Arc<Inner>,
    key: SubscriptionKey,
    entries: Entries,
    pump: Option<Pump>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Op>) {
        while let Some(op) = rx.recv().await {
            match op {
                Op::Subscribe {
                    connection,
                    on_handle,
                    done,
                } => {
                    let _ = done.send(self.subscribe(connection, on_handle).await);
                }
                Op::Unsubscribe { connection, done } => {
                    let _ = done.send(self.unsubscribe(connection).await);
                }
            }

            if self.entries.read().is_empty() {
                // enqueue holds this lock while sending, so nothing slips in
                // between the emptiness check and the removal
                let mut queues = self.inner.queues.lock();
                if rx.is_empty() {
                    queues.remove(&self.key);
                    self.inner.records.remove(&self.key);
                    return;
                }
            }
        }
    }

    async fn subscribe(&mut self, connection: ConnectionId, on_handle: OnHandle) -> Result<(), BusError> {
        if self.pump.is_none() {
            let subscription = self.inner.bus.subscribe(&self.key.bus_subject()).await?;
            tracing::debug!(key = %self.key, "opened broker subscription");
            self.pump = Some(Pump::spawn(self.key.clone(), subscription, Arc::clone(&self.entries)));
            self.inner
                .records
                .insert(self.key.clone(), Arc::clone(&self.entries));
        }

        if self.entries.write().insert(connection, on_handle).is_none() {
            self.inner.index(connection, &self.key);
            hermes_telemetry::subscription_added();
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, connection: ConnectionId) -> Result<bool, BusError> {
        let removed = self.entries.write().remove(&connection).is_some();
        if !removed {
            return Ok(false);
        }
        self.inner.unindex(connection, &self.key);
        hermes_telemetry::subscription_removed();

        if self.entries.read().is_empty() {
            if let Some(pump) = self.pump.take() {
                pump.stop().await?;
                tracing::debug!(key = %self.key, "closed broker subscription");
            }
        }
        Ok(true)
    }
}

/// Task forwarding broker events to the key's subscribers.
struct Pump {
    stop: oneshot::Sender<()>,
    task: JoinHandle<BoxSubscription>,
}

impl Pump {
    fn spawn(key: SubscriptionKey, subscription: BoxSubscription, entries: Entries) -> Self {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(pump(key, subscription, entries, stopped));
        Self { stop, task }
    }

    async fn stop(self) -> Result<(), BusError> {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(mut subscription) => subscription.unsubscribe().await,
            Err(err) => Err(BusError::Other(format!("subscription pump failed: {err}"))),
        }
    }
}

async fn pump(
    key: SubscriptionKey,
    mut subscription: BoxSubscription,
    entries: Entries,
    mut stopped: oneshot::Receiver<()>,
) -> BoxSubscription {
    loop {
        tokio::select! {
            _ = &mut stopped => break,
            message = subscription.next() => match message {
                Some(message) => {
                    let frame = ServerFrame::from_event(key.subject(), &message.payload);
                    fan_out(&key, &entries, &frame);
                }
                None => {
                    tracing::debug!(key = %key, "broker subscription ended");
                    break;
                }
            },
        }
    }
    subscription
}

/// Delivers `frame` to every subscriber of `key`.
///
/// A failing callback gets a 500 error frame instead; the loop carries on.
fn fan_out(key: &SubscriptionKey, entries: &Entries, frame: &ServerFrame) {
    let targets: Vec<(ConnectionId, OnHandle)> = entries
        .read()
        .iter()
        .map(|(connection, on_handle)| (*connection, Arc::clone(on_handle)))
        .collect();

    for (connection, on_handle) in targets {
        let failure = match catch_unwind(AssertUnwindSafe(|| on_handle(frame))) {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "callback panicked".to_string(),
        };
        tracing::warn!(%connection, key = %key, error = %failure, "failed to deliver event");

        let notice = ServerFrame::error(
            key.subject(),
            status::INTERNAL_SERVER_ERROR,
            json!({ "message": "Internal server error" }),
        );
        let _ = catch_unwind(AssertUnwindSafe(|| on_handle(&notice)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{codec, MemoryBus, Response};
    use std::time::Duration;

    fn channel_handle() -> (OnHandle, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let on_handle: OnHandle = Arc::new(move |frame: &ServerFrame| {
            tx.send(frame.clone())?;
            Ok(())
        });
        (on_handle, rx)
    }

    async fn publish(bus: &MemoryBus, subject: &str, body: serde_json::Value) {
        let payload = codec::encode_response(&Response::ok(Default::default(), Some(body))).unwrap();
        bus.publish(subject, payload).await.unwrap();
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> ServerFrame {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_key_bus_subject() {
        assert_eq!(SubscriptionKey::new("chat", None).bus_subject(), "chat");
        assert_eq!(
            SubscriptionKey::new("chat", Some("team1".into())).bus_subject(),
            "chat.team1"
        );
        assert_eq!(SubscriptionKey::new("chat", Some(String::new())).namespace(), None);
    }

    #[tokio::test]
    async fn test_one_broker_subscription_per_key() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let key = SubscriptionKey::new("news", None);
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        let (handle_a, mut rx_a) = channel_handle();
        let (handle_b, mut rx_b) = channel_handle();

        manager.subscribe(a, &key, handle_a).await.unwrap();
        manager.subscribe(b, &key, handle_b).await.unwrap();
        assert_eq!(bus.subscribe_calls("news"), 1);
        assert_eq!(manager.subscriber_count(&key), 2);

        publish(&bus, "news", json!("first")).await;
        assert_eq!(next(&mut rx_a).await.body, Some(json!("first")));
        assert_eq!(next(&mut rx_b).await.body, Some(json!("first")));

        assert!(manager.unsubscribe(a, &key).await.unwrap());
        assert_eq!(bus.subscriber_count("news"), 1);

        publish(&bus, "news", json!("second")).await;
        assert_eq!(next(&mut rx_b).await.body, Some(json!("second")));

        assert!(manager.unsubscribe(b, &key).await.unwrap());
        assert_eq!(bus.subscriber_count("news"), 0);
        assert!(manager.keys().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_separate_keys() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let team1 = SubscriptionKey::new("chat", Some("team1".into()));
        let team2 = SubscriptionKey::new("chat", Some("team2".into()));
        let (handle_1, mut rx_1) = channel_handle();
        let (handle_2, mut rx_2) = channel_handle();

        manager.subscribe(ConnectionId::new(), &team1, handle_1).await.unwrap();
        manager.subscribe(ConnectionId::new(), &team2, handle_2).await.unwrap();

        publish(&bus, "chat.team2", json!("hello two")).await;
        let frame = next(&mut rx_2).await;
        assert_eq!(frame.subject, "chat");
        assert_eq!(frame.body, Some(json!("hello two")));
        assert!(rx_1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_unsubscribe() {
        let manager = SubscriptionManager::new(Arc::new(MemoryBus::new()));
        let removed = manager
            .unsubscribe(ConnectionId::new(), &SubscriptionKey::new("ghost", None))
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_callback() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let key = SubscriptionKey::new("news", None);
        let connection = ConnectionId::new();
        let (first, mut rx_first) = channel_handle();
        let (second, mut rx_second) = channel_handle();

        manager.subscribe(connection, &key, first).await.unwrap();
        manager.subscribe(connection, &key, second).await.unwrap();
        assert_eq!(manager.subscriber_count(&key), 1);

        publish(&bus, "news", json!(1)).await;
        assert_eq!(next(&mut rx_second).await.body, Some(json!(1)));
        assert!(rx_first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_subjects() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let connection = ConnectionId::new();
        let other = ConnectionId::new();
        let news = SubscriptionKey::new("news", None);
        let chat = SubscriptionKey::new("chat", Some("t".into()));
        let (handle, _rx) = channel_handle();
        let (other_handle, _other_rx) = channel_handle();

        manager.subscribe(connection, &news, Arc::clone(&handle)).await.unwrap();
        manager.subscribe(connection, &chat, handle).await.unwrap();
        manager.subscribe(other, &news, other_handle).await.unwrap();
        assert_eq!(manager.subjects_of(connection), vec![chat.clone(), news.clone()]);

        assert_eq!(manager.unsubscribe_all_subjects(connection).await, 2);
        assert!(manager.subjects_of(connection).is_empty());
        assert_eq!(bus.subscriber_count("chat.t"), 0);
        assert_eq!(bus.subscriber_count("news"), 1);
        assert_eq!(manager.keys(), vec![news]);
    }

    #[tokio::test]
    async fn test_failing_callback_gets_error_frame() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let key = SubscriptionKey::new("alerts", None);

        let (tx, mut notices) = mpsc::unbounded_channel();
        let flaky: OnHandle = Arc::new(move |frame: &ServerFrame| {
            if frame.code == status::OK {
                anyhow::bail!("client buffer full");
            }
            tx.send(frame.clone())?;
            Ok(())
        });
        let (healthy, mut rx) = channel_handle();

        manager.subscribe(ConnectionId::new(), &key, flaky).await.unwrap();
        manager.subscribe(ConnectionId::new(), &key, healthy).await.unwrap();

        publish(&bus, "alerts", json!("fire")).await;
        assert_eq!(next(&mut rx).await.body, Some(json!("fire")));
        let notice = next(&mut notices).await;
        assert_eq!(notice.code, 500);
        assert_eq!(notice.subject, "alerts");
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_fan_out() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let key = SubscriptionKey::new("alerts", None);
        let explosive: OnHandle = Arc::new(|_: &ServerFrame| panic!("boom"));
        let (healthy, mut rx) = channel_handle();

        manager.subscribe(ConnectionId::new(), &key, explosive).await.unwrap();
        manager.subscribe(ConnectionId::new(), &key, healthy).await.unwrap();

        publish(&bus, "alerts", json!(1)).await;
        publish(&bus, "alerts", json!(2)).await;
        assert_eq!(next(&mut rx).await.body, Some(json!(1)));
        assert_eq!(next(&mut rx).await.body, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_share_one_broker_subscription() {
        let bus = MemoryBus::new();
        let manager = SubscriptionManager::new(Arc::new(bus.clone()));
        let key = SubscriptionKey::new("ticker", None);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let manager = manager.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                let connection = ConnectionId::new();
                let (handle, _rx) = channel_handle();
                manager.subscribe(connection, &key, handle).await.unwrap();
                if i % 2 == 0 {
                    manager.unsubscribe(connection, &key).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(manager.subscriber_count(&key), 8);
        assert_eq!(bus.subscriber_count("ticker"), 1);
    }
}
