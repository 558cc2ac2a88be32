use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::task::TaskKind;

/// Classification of why a task settled unsuccessfully. Carried inside
/// `TaskResult`, never thrown.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The handler ran and returned an error.
    HandlerFailed,
    /// The deadline fired before the slot reported completion.
    TaskTimeout,
    /// The slot's execution unit terminated abnormally mid-task.
    WorkerCrashed,
    /// The pool shut down before the task could finish.
    PoolShuttingDown,
}

impl TaskErrorKind {
    /// Short classification string for logging/metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskErrorKind::HandlerFailed => "handler_failed",
            TaskErrorKind::TaskTimeout => "task_timeout",
            TaskErrorKind::WorkerCrashed => "worker_crashed",
            TaskErrorKind::PoolShuttingDown => "pool_shutting_down",
        }
    }
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-contract violations, reported synchronously from `submit` rather
/// than through the settlement future.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("duplicate task id among outstanding tasks: {0}")]
    DuplicateTaskId(TaskId),
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error("pool is shutting down")]
    PoolShuttingDown,
}

impl SubmitError {
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::DuplicateTaskId(_) | Self::InvalidTask(_))
    }
}

/// Handler registry construction errors.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler already registered for task kind: {0}")]
    DuplicateHandler(TaskKind),
}
