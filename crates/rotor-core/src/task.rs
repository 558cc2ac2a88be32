use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TaskErrorKind;
use crate::ids::{SlotId, TaskId};

/// Dispatch priority. Dequeue order is High, then Normal, then Low; the
/// derived `Ord` matches that order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Dense index for per-priority lanes (0 = dispatched first).
    pub fn lane(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

/// Closed set of work the pool knows how to execute. Each kind maps to one
/// registered handler.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Monitor,
    Parse,
    HealthCheck,
    Collect,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Monitor => "monitor",
            TaskKind::Parse => "parse",
            TaskKind::HealthCheck => "health_check",
            TaskKind::Collect => "collect",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of background work. Immutable once submitted; re-submission
/// requires a fresh id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            payload,
            priority: Priority::Normal,
            timeout_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Check the caller contract. Violations are reported synchronously at
    /// submit time, never through the settlement future.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("task id must not be empty".into());
        }
        if self.timeout_ms == Some(0) {
            return Err("task timeout must be greater than zero".into());
        }
        Ok(())
    }
}

/// Final outcome of one accepted task. Exactly one of these is produced per
/// accepted task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<TaskErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
    /// Absent when the task was cancelled before ever reaching a slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<SlotId>,
}

impl TaskResult {
    pub fn completed(
        task_id: TaskId,
        slot_id: SlotId,
        value: serde_json::Value,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            task_id,
            success: true,
            value: Some(value),
            error_kind: None,
            error: None,
            processing_time_ms,
            slot_id: Some(slot_id),
        }
    }

    pub fn failed(
        task_id: TaskId,
        slot_id: Option<SlotId>,
        kind: TaskErrorKind,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            task_id,
            success: false,
            value: None,
            error_kind: Some(kind),
            error: Some(error.into()),
            processing_time_ms,
            slot_id,
        }
    }
}
