use std::sync::Arc;
use std::time::Duration;

use rotor_core::HubEvent;

use crate::connection::{ConnectionRegistry, EvictionReason, SendStatus};

/// Start the liveness monitor: every tick, evict connections with no inbound
/// traffic inside the staleness threshold, then ping the survivors. A failed
/// ping send evicts the same way a failed broadcast does.
///
/// The monitor never refreshes liveness itself — successfully handing a ping
/// to the transport proves nothing about the remote side; only inbound
/// traffic does, via `ConnectionRegistry::touch`.
pub fn start_liveness_monitor(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    staleness_threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume first immediate tick

        loop {
            ticker.tick().await;

            let stale = registry.stale_ids(staleness_threshold.as_secs());
            let evicted = stale.len();
            for id in stale {
                registry.evict(&id, EvictionReason::ConnectionStale);
            }
            if evicted > 0 {
                tracing::info!(evicted, "Stale connection sweep");
            }

            let ping = match serde_json::to_string(&HubEvent::liveness_ping()) {
                Ok(ping) => ping,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to serialize liveness ping");
                    continue;
                }
            };
            for id in registry.connection_ids() {
                if registry.send_to(&id, ping.clone()) == SendStatus::Closed {
                    registry.evict(&id, EvictionReason::SendFailed);
                }
            }
        }
    })
}
