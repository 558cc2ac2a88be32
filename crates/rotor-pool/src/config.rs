use std::time::Duration;

/// Pool configuration. Plain values with defaults; no external files.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker slots. Defaults to the host's available parallelism.
    pub size: usize,
    /// Timeout applied to tasks that don't carry their own. `None` means
    /// untimed tasks run until they report.
    pub default_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            default_timeout: None,
        }
    }
}
