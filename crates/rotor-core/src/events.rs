use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, TaskId};

/// Events pushed to connected clients. Serialized as
/// `{ "type": <kind>, "payload": { ... } }` on the wire.
///
/// `welcome` is sent once at registration and `liveness_ping` is internal to
/// the liveness monitor; the remaining four are the domain events producers
/// broadcast.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HubEvent {
    Welcome {
        connection_id: ConnectionId,
        timestamp: DateTime<Utc>,
    },
    StatusUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        topic_key: Option<String>,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
    HealthCheck {
        #[serde(skip_serializing_if = "Option::is_none")]
        topic_key: Option<String>,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
    TaskCompletion {
        #[serde(skip_serializing_if = "Option::is_none")]
        topic_key: Option<String>,
        task_id: TaskId,
        success: bool,
        processing_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ErrorNotification {
        #[serde(skip_serializing_if = "Option::is_none")]
        topic_key: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    LivenessPing {
        timestamp: DateTime<Utc>,
    },
}

impl HubEvent {
    pub fn welcome(connection_id: ConnectionId) -> Self {
        Self::Welcome {
            connection_id,
            timestamp: Utc::now(),
        }
    }

    pub fn status_update(
        topic_key: Option<String>,
        status: impl Into<String>,
        progress: Option<f64>,
    ) -> Self {
        Self::StatusUpdate {
            topic_key,
            status: status.into(),
            progress,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn health_check(topic_key: Option<String>, status: impl Into<String>) -> Self {
        Self::HealthCheck {
            topic_key,
            status: status.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn task_completion(
        topic_key: Option<String>,
        task_id: TaskId,
        success: bool,
        processing_time_ms: u64,
    ) -> Self {
        Self::TaskCompletion {
            topic_key,
            task_id,
            success,
            processing_time_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn error_notification(topic_key: Option<String>, error: impl Into<String>) -> Self {
        Self::ErrorNotification {
            topic_key,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn liveness_ping() -> Self {
        Self::LivenessPing {
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::StatusUpdate { .. } => "status_update",
            Self::HealthCheck { .. } => "health_check",
            Self::TaskCompletion { .. } => "task_completion",
            Self::ErrorNotification { .. } => "error_notification",
            Self::LivenessPing { .. } => "liveness_ping",
        }
    }

    /// Topic scope of the event, if any. Welcome and liveness pings are
    /// never topic-scoped.
    pub fn topic_key(&self) -> Option<&str> {
        match self {
            Self::StatusUpdate { topic_key, .. }
            | Self::HealthCheck { topic_key, .. }
            | Self::TaskCompletion { topic_key, .. }
            | Self::ErrorNotification { topic_key, .. } => topic_key.as_deref(),
            Self::Welcome { .. } | Self::LivenessPing { .. } => None,
        }
    }
}
