//! Identity → live connection registry with targeted and broadcast push.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;

use crate::types::{Envelope, Identity};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Push topics a client may opt into with `subscribe_*` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Price,
    Staking,
}

/// One authenticated WebSocket connection.
pub struct ClientConnection {
    /// Process-unique connection id.
    pub id: u64,
    /// Identity the connection authenticated as.
    pub identity: Identity,
    /// Queue drained by the connection's write loop.
    tx: mpsc::Sender<Message>,
    /// When this connection was established.
    pub connected_at: Instant,
    topics: Mutex<HashSet<Topic>>,
    /// Count of messages dropped because the queue was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection with a fresh id.
    pub fn new(identity: Identity, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            identity,
            tx,
            connected_at: Instant::now(),
            topics: Mutex::new(HashSet::new()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Whether the write loop is still draining the queue.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a raw frame without blocking.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Message) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue an already-encoded envelope.
    pub fn send_text(&self, text: &str) -> bool {
        self.send(Message::Text(text.to_owned().into()))
    }

    /// Encode and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(text) => self.send_text(&text),
            Err(e) => {
                tracing::warn!(kind = %envelope.kind, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    /// Record an opt-in. Returns `false` if already present.
    pub fn add_topic(&self, topic: Topic) -> bool {
        self.topics.lock().insert(topic)
    }

    pub fn has_topic(&self, topic: Topic) -> bool {
        self.topics.lock().contains(&topic)
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("open", &self.is_open())
            .finish()
    }
}

/// The set of live connections, keyed by identity.
///
/// Mutated only when a connection registers or closes; read by
/// [`send_to_client`](Self::send_to_client) and [`broadcast`](Self::broadcast).
/// Fan-out snapshots the connections and releases the lock before sending.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Identity, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous one for the same
    /// identity. Returns the replaced connection.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let mut conns = self.connections.write().await;
        let previous = conns.insert(connection.identity.clone(), connection);
        if let Some(prev) = &previous {
            tracing::info!(identity = %prev.identity, replaced = prev.id, "Connection replaced");
        }
        previous
    }

    /// Remove the entry for `identity` if it still belongs to
    /// `connection_id`. A replaced connection closing late leaves its
    /// successor registered.
    pub async fn unregister(&self, identity: &Identity, connection_id: u64) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(identity) {
            Some(current) if current.id == connection_id => {
                conns.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Deliver `envelope` to the live connection for `identity`.
    ///
    /// Silent no-op when there is none. `true` only means the frame was
    /// queued, not that it reached the client.
    pub async fn send_to_client(&self, identity: &str, envelope: &Envelope) -> bool {
        let conn = self.connections.read().await.get(identity).cloned();
        match conn {
            Some(conn) if conn.is_open() => conn.send_envelope(envelope),
            Some(_) => {
                tracing::debug!(identity, kind = %envelope.kind, "Target connection not open");
                false
            }
            None => {
                tracing::trace!(identity, kind = %envelope.kind, "No live connection for identity");
                false
            }
        }
    }

    /// Deliver `envelope` to every open connection. Returns how many
    /// connections it was queued on.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        self.fan_out(envelope, |_| true).await
    }

    /// Deliver `envelope` to open connections that opted into `topic`.
    pub async fn broadcast_to_topic(&self, topic: Topic, envelope: &Envelope) -> usize {
        self.fan_out(envelope, |c| c.has_topic(topic)).await
    }

    async fn fan_out<F>(&self, envelope: &Envelope, filter: F) -> usize
    where
        F: Fn(&ClientConnection) -> bool,
    {
        let text = match envelope.encode() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(kind = %envelope.kind, error = %e, "Failed to encode broadcast");
                return 0;
            }
        };
        let targets: Vec<Arc<ClientConnection>> =
            self.connections.read().await.values().cloned().collect();

        let mut delivered = 0;
        for conn in &targets {
            if !conn.is_open() || !filter(conn.as_ref()) {
                continue;
            }
            if conn.send_text(&text) {
                delivered += 1;
            } else {
                tracing::warn!(identity = %conn.identity, "Failed to queue broadcast");
            }
        }
        tracing::debug!(kind = %envelope.kind, recipients = delivered, "Broadcast");
        delivered
    }

    /// The live connection for `identity`, if any.
    pub async fn get(&self, identity: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(identity).cloned()
    }

    pub async fn contains(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_connection(identity: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(ClientConnection::new(identity.into(), tx)), rx)
    }

    fn text(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_to_unknown_identity_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_client("nobody", &Envelope::pong()).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn newest_connection_wins() {
        let registry = ConnectionRegistry::new();
        let (first, mut rx1) = make_connection("abc");
        let (second, mut rx2) = make_connection("abc");
        registry.register(first.clone()).await;
        let replaced = registry.register(second.clone()).await;
        assert_eq!(replaced.map(|c| c.id), Some(first.id));

        let env = Envelope::new("staking_update", json!({"stakedAmount": 150}));
        assert!(registry.send_to_client("abc", &env).await);
        assert!(rx1.try_recv().is_err());
        assert_eq!(text(rx2.try_recv().unwrap())["data"]["stakedAmount"], 150);
    }

    #[tokio::test]
    async fn stale_unregister_keeps_successor() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = make_connection("abc");
        let (second, _rx2) = make_connection("abc");
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        assert!(!registry.unregister(&"abc".into(), first.id).await);
        assert!(registry.contains("abc").await);
        assert!(registry.unregister(&"abc".into(), second.id).await);
        assert!(!registry.contains("abc").await);
    }

    #[tokio::test]
    async fn broadcast_skips_closed_connections() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("a");
        let (b, rx_b) = make_connection("b");
        registry.register(a).await;
        registry.register(b).await;
        drop(rx_b);

        let delivered = registry
            .broadcast(&Envelope::new("price_update", json!({"sol": 1.0, "cvt": 0.1})))
            .await;
        assert_eq!(delivered, 1);
        assert_eq!(text(rx_a.try_recv().unwrap())["type"], "price_update");
    }

    #[tokio::test]
    async fn topic_broadcast_reaches_opted_in_only() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = make_connection("a");
        let (b, mut rx_b) = make_connection("b");
        assert!(a.add_topic(Topic::Staking));
        assert!(!a.add_topic(Topic::Staking));
        registry.register(a).await;
        registry.register(b).await;

        let delivered = registry
            .broadcast_to_topic(Topic::Staking, &Envelope::new("staking_update", json!({})))
            .await;
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_counts_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new("abc".into(), tx);
        assert!(conn.send_envelope(&Envelope::pong()));
        assert!(!conn.send_envelope(&Envelope::pong()));
        assert_eq!(conn.drop_count(), 1);
    }
}
