mod logging;
mod metrics;

pub use logging::{BufferLogLayer, LogBuffer, LogQuery, LogRecord};
pub use metrics::{MetricType, MetricsRecorder, MetricsSnapshot};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "rotor_pool" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Whether to capture warn+ logs into the in-memory buffer.
    pub log_capture: bool,
    /// How many captured records to retain.
    pub log_buffer_capacity: usize,
    /// Whether metrics recording is enabled.
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_capture: true,
            log_buffer_capacity: 1024,
            metrics_enabled: true,
        }
    }
}

/// Handle to the telemetry subsystem, returned by `init_telemetry`.
pub struct TelemetryGuard {
    log_buffer: Option<Arc<LogBuffer>>,
    metrics_recorder: Option<Arc<MetricsRecorder>>,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let mut levels = self.level_filter.write();
        if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            levels.push((module.to_string(), level));
        }
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }

    /// Access the metrics recorder for recording and querying.
    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.metrics_recorder.as_deref()
    }

    /// Access the captured warn+ logs.
    pub fn logs(&self) -> Option<&LogBuffer> {
        self.log_buffer.as_deref()
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let level_filter = Arc::new(RwLock::new(config.module_levels.clone()));

    // Build the env filter from config
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // JSON formatting layer for stdout
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    // Optional in-memory capture of warn+ logs
    let (capture_layer, log_buffer) = if config.log_capture {
        let buffer = Arc::new(LogBuffer::new(config.log_buffer_capacity));
        let layer = BufferLogLayer::new(Arc::clone(&buffer));
        (Some(layer), Some(buffer))
    } else {
        (None, None)
    };

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(capture_layer)
        .init();

    // Optional metrics recorder
    let metrics_recorder = config
        .metrics_enabled
        .then(|| Arc::new(MetricsRecorder::new()));

    TelemetryGuard {
        log_buffer,
        metrics_recorder,
        level_filter,
    }
}
