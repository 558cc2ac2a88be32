use std::time::Duration;

/// Hub configuration. Plain values with defaults; no external files.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// How often the liveness monitor ticks.
    pub liveness_interval: Duration,
    /// A connection with no inbound traffic for this long is evicted.
    pub staleness_threshold: Duration,
    /// Per-connection outbound queue depth before events are dropped.
    pub max_send_queue: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_secs(30),
            staleness_threshold: Duration::from_secs(60),
            max_send_queue: 256,
        }
    }
}
