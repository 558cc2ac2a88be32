use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
}

/// One metric value at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub name: String,
    pub value: i64,
    pub metric_type: MetricType,
}

/// In-memory recorder for the coordinator's vitals: monotonically increasing
/// counters (probes run, events broadcast) and integer occupancy gauges
/// (queue depth, busy/idle slots, live connections). Names are dot-separated
/// and unlabelled; the publisher already scopes them.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicI64>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, n: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_owned())
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Set a gauge to the current occupancy value.
    pub fn gauge_set(&self, name: &str, value: i64) {
        if let Some(gauge) = self.gauges.read().get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(name.to_owned())
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    /// Current value of a counter; unknown names read as zero.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Current value of a gauge; unknown names read as zero.
    pub fn gauge_get(&self, name: &str) -> i64 {
        self.gauges
            .read()
            .get(name)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    /// Point-in-time snapshot of every metric, sorted by name for stable
    /// status output.
    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        let now = Utc::now().to_rfc3339();
        let mut out = Vec::new();

        for (name, counter) in self.counters.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now.clone(),
                name: name.clone(),
                value: counter.load(Ordering::Relaxed) as i64,
                metric_type: MetricType::Counter,
            });
        }
        for (name, gauge) in self.gauges.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now.clone(),
                name: name.clone(),
                value: gauge.load(Ordering::Relaxed),
                metric_type: MetricType::Gauge,
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
