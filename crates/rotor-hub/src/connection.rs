use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use rotor_core::ConnectionId;

/// Why a connection left the registry. Eviction is terminal; a reconnect
/// creates a new connection with a new id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvictionReason {
    /// Transport-level close or explicit deregister.
    Closed,
    /// The outbound channel was gone when we tried to push an event.
    SendFailed,
    /// No inbound traffic within the staleness threshold.
    ConnectionStale,
}

impl EvictionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionReason::Closed => "closed",
            EvictionReason::SendFailed => "send_failed",
            EvictionReason::ConnectionStale => "connection_stale",
        }
    }
}

/// Outcome of pushing one message at one connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendStatus {
    Sent,
    /// Queue full or connection briefly locked; message dropped, connection
    /// kept.
    Dropped,
    /// Channel closed; the connection should be evicted.
    Closed,
}

/// A registered client connection.
pub struct Connection {
    pub id: ConnectionId,
    pub subscriptions: HashSet<String>,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_liveness: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            subscriptions: HashSet::new(),
            tx,
            connected: AtomicBool::new(true),
            last_liveness: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Record inbound traffic. Only inbound messages prove the remote side is
    /// alive; outbound ping delivery does not.
    pub fn record_liveness(&self) {
        self.last_liveness.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_stale(&self, threshold_secs: u64) -> bool {
        let last = self.last_liveness.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) > threshold_secs
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Result of fanning one serialized event out across the registry.
pub(crate) struct FanOut {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

/// Registry of live connections. Exclusively owns connection records; the
/// hub and the liveness monitor mutate them only through this API.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Mutex<Connection>>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Add a new connection with empty subscriptions and fresh liveness.
    /// Returns its id plus the receiver for the transport's writer task.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let connection = Arc::new(Mutex::new(Connection::new(id.clone(), tx)));
        self.connections.insert(id.clone(), connection);
        (id, rx)
    }

    /// Remove a connection. Safe to call twice; returns whether anything was
    /// actually removed.
    pub fn evict(&self, id: &ConnectionId, reason: EvictionReason) -> bool {
        if let Some((_, connection)) = self.connections.remove(id) {
            if let Ok(conn) = connection.try_lock() {
                conn.connected.store(false, Ordering::Relaxed);
            }
            tracing::info!(connection_id = %id, reason = reason.as_str(), "Connection evicted");
            true
        } else {
            false
        }
    }

    /// Add topic keys to a connection's subscription set. Idempotent.
    pub async fn subscribe(&self, id: &ConnectionId, topic_keys: &[String]) {
        if let Some(connection) = self.connections.get(id) {
            let mut conn = connection.lock().await;
            for key in topic_keys {
                conn.subscriptions.insert(key.clone());
            }
        }
    }

    /// Remove topic keys from a connection's subscription set. Idempotent.
    pub async fn unsubscribe(&self, id: &ConnectionId, topic_keys: &[String]) {
        if let Some(connection) = self.connections.get(id) {
            let mut conn = connection.lock().await;
            for key in topic_keys {
                conn.subscriptions.remove(key);
            }
        }
    }

    pub async fn subscriptions(&self, id: &ConnectionId) -> Option<HashSet<String>> {
        match self.connections.get(id) {
            Some(connection) => Some(connection.lock().await.subscriptions.clone()),
            None => None,
        }
    }

    /// Refresh a connection's liveness timestamp. Called by the transport on
    /// any inbound message.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(connection) = self.connections.get(id) {
            if let Ok(conn) = connection.try_lock() {
                conn.record_liveness();
            }
        }
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Ids of connections whose last inbound message is older than the
    /// threshold.
    pub fn stale_ids(&self, threshold_secs: u64) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter_map(|entry| {
                let conn = entry.value().try_lock().ok()?;
                conn.is_stale(threshold_secs).then(|| conn.id.clone())
            })
            .collect()
    }

    /// Push one message at one connection.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> SendStatus {
        let Some(connection) = self.connections.get(id) else {
            return SendStatus::Closed;
        };
        let Ok(conn) = connection.try_lock() else {
            return SendStatus::Dropped;
        };
        match conn.tx.try_send(message) {
            Ok(()) => SendStatus::Sent,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                SendStatus::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendStatus::Closed,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_last_liveness(&self, id: &ConnectionId, secs: u64) {
        if let Some(connection) = self.connections.get(id) {
            if let Ok(conn) = connection.try_lock() {
                conn.last_liveness.store(secs, Ordering::Relaxed);
            }
        }
    }

    /// Fan one serialized event out: every connection when `target_topic` is
    /// `None`, otherwise only connections subscribed to that topic. Failed
    /// recipients are reported back, not evicted here, so callers never
    /// mutate the map mid-iteration.
    pub(crate) fn fan_out(&self, message: &str, target_topic: Option<&str>) -> FanOut {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in self.connections.iter() {
            let Ok(conn) = entry.value().try_lock() else {
                continue;
            };
            if !conn.is_connected() {
                continue;
            }
            if let Some(topic) = target_topic {
                if !conn.subscriptions.contains(topic) {
                    continue;
                }
            }
            match conn.tx.try_send(message.to_owned()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    tracing::warn!(
                        connection_id = %conn.id,
                        msg_len = msg.len(),
                        "Send queue full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => failed.push(conn.id.clone()),
            }
        }
        FanOut { delivered, failed }
    }
}
