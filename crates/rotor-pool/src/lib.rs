//! Priority worker pool dispatcher.
//!
//! A fixed set of worker slots executes submitted tasks in parallel, fed by a
//! single dispatch loop that owns the priority queue, the slot table, and the
//! pending-settlement map. Callers get back a [`TaskReceipt`] that resolves
//! exactly once with a [`rotor_core::TaskResult`]; timeouts and crashed
//! execution units recycle the affected slot without disturbing the rest of
//! the pool.

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod queue;
mod slot;

pub use config::PoolConfig;
pub use dispatcher::{BatchReceipt, PoolStats, TaskReceipt, WorkerPool};
pub use handler::{HandlerError, HandlerRegistry, TaskHandler};
pub use slot::SlotState;
