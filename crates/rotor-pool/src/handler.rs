use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use rotor_core::{RegistryError, Task, TaskKind};

/// Error returned by a task handler. A handler error settles the task as
/// `handler_failed`; it does not recycle the execution unit.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

/// A handler for one task kind. Runs inside a worker slot's execution unit.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError>;
}

/// Registry of handlers (task kind -> handler).
///
/// Built during initialization (mutable), used at runtime behind an `Arc`
/// (immutable), so the pool never locks it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
