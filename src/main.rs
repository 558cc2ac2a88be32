use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rotor_core::{HubEvent, Task, TaskKind};
use rotor_hub::{start_liveness_monitor, BroadcastHub, HubConfig};
use rotor_pool::{HandlerError, HandlerRegistry, PoolConfig, TaskHandler, WorkerPool};
use rotor_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

const STATUS_INTERVAL: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Built-in health probe run through the pool itself, so the probe also
/// exercises the dispatch path.
struct HealthCheckHandler {
    started_at: std::time::Instant,
}

#[async_trait]
impl TaskHandler for HealthCheckHandler {
    async fn handle(&self, _task: &Task) -> Result<serde_json::Value, HandlerError> {
        Ok(serde_json::json!({
            "status": "ok",
            "uptime_secs": self.started_at.elapsed().as_secs(),
        }))
    }
}

#[tokio::main]
async fn main() {
    let telemetry = init_telemetry(TelemetryConfig::default());
    tracing::info!("Starting rotor coordinator");

    let mut handlers = HandlerRegistry::new();
    handlers
        .register(
            TaskKind::HealthCheck,
            Arc::new(HealthCheckHandler {
                started_at: std::time::Instant::now(),
            }),
        )
        .expect("Failed to register health-check handler");

    let pool = WorkerPool::start(PoolConfig::default(), handlers);

    let hub_config = HubConfig::default();
    let hub = BroadcastHub::new(&hub_config);
    let _liveness = start_liveness_monitor(
        hub.registry(),
        hub_config.liveness_interval,
        hub_config.staleness_threshold,
    );

    tracing::info!("Coordinator ready");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = status_loop(&pool, &hub, &telemetry) => {}
    }

    tracing::info!("Shutting down");
    pool.shutdown(DRAIN_TIMEOUT).await;
}

/// Periodically probe health through the pool, publish gauges, and broadcast
/// a coordinator status event to connected clients.
async fn status_loop(pool: &WorkerPool, hub: &BroadcastHub, telemetry: &TelemetryGuard) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await; // consume first immediate tick

    loop {
        ticker.tick().await;

        match pool
            .submit(Task::new(
                TaskKind::HealthCheck,
                serde_json::json!({"probe": "coordinator"}),
            ))
            .await
        {
            Ok(receipt) => {
                if let Some(metrics) = telemetry.metrics() {
                    metrics.counter_inc("coordinator.health_probes", 1);
                }
                let result = receipt.wait().await;
                hub.broadcast(
                    &HubEvent::task_completion(
                        None,
                        result.task_id.clone(),
                        result.success,
                        result.processing_time_ms,
                    ),
                    None,
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "Health probe submission failed");
            }
        }

        let stats = pool.stats().await;
        let hub_stats = hub.stats();
        if let Some(metrics) = telemetry.metrics() {
            metrics.gauge_set("pool.tasks.queued", stats.queued as i64);
            metrics.gauge_set("pool.slots.busy", stats.busy as i64);
            metrics.gauge_set("pool.slots.idle", stats.idle as i64);
            metrics.gauge_set("hub.connections.active", hub_stats.connected_count as i64);
        }
        hub.broadcast(&HubEvent::status_update(None, "coordinator_alive", None), None);
        tracing::info!(
            queued = stats.queued,
            busy = stats.busy,
            idle = stats.idle,
            connections = hub_stats.connected_count,
            "Coordinator status"
        );
    }
}
