use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use rotor_core::{ConnectionId, HubEvent};

use crate::config::HubConfig;
use crate::connection::{ConnectionRegistry, EvictionReason};

/// Point-in-time hub snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HubStats {
    pub connected_count: usize,
}

/// Pushes events to registered connections, selecting recipients by topic
/// subscription. Owns the connection registry; producers call `broadcast`,
/// transports call `register` / `touch` / `deregister`.
pub struct BroadcastHub {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastHub {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new(config.max_send_queue)),
        }
    }

    /// The registry handle, for the liveness monitor.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Register a new connection and greet it. The returned receiver goes to
    /// the transport's writer task.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let (id, rx) = self.registry.register();
        match serde_json::to_string(&HubEvent::welcome(id.clone())) {
            Ok(welcome) => {
                // the queue is empty on a fresh connection, this cannot drop
                let _ = self.registry.send_to(&id, welcome);
            }
            Err(err) => {
                tracing::error!(connection_id = %id, error = %err, "Failed to serialize welcome event");
            }
        }
        tracing::info!(connection_id = %id, "Connection registered");
        (id, rx)
    }

    pub async fn subscribe(&self, id: &ConnectionId, topic_keys: &[String]) {
        self.registry.subscribe(id, topic_keys).await;
        tracing::debug!(connection_id = %id, topics = topic_keys.len(), "Subscribed");
    }

    pub async fn unsubscribe(&self, id: &ConnectionId, topic_keys: &[String]) {
        self.registry.unsubscribe(id, topic_keys).await;
        tracing::debug!(connection_id = %id, topics = topic_keys.len(), "Unsubscribed");
    }

    /// Transport-level close or error.
    pub fn deregister(&self, id: &ConnectionId) {
        self.registry.evict(id, EvictionReason::Closed);
    }

    /// Inbound traffic from the transport refreshes liveness.
    pub fn touch(&self, id: &ConnectionId) {
        self.registry.touch(id);
    }

    /// Send an event to every connection, or — with a target topic — only to
    /// its subscribers. Best-effort: a recipient whose channel is gone is
    /// evicted and the rest still receive the event. Returns the number of
    /// connections the event was queued for.
    pub fn broadcast(&self, event: &HubEvent, target_topic: Option<&str>) -> usize {
        let message = match serde_json::to_string(event) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(event = event.event_type(), error = %err, "Failed to serialize event");
                return 0;
            }
        };
        let outcome = self.registry.fan_out(&message, target_topic);
        for id in outcome.failed {
            self.registry.evict(&id, EvictionReason::SendFailed);
        }
        outcome.delivered
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connected_count: self.registry.count(),
        }
    }
}
