//! Shared data types for the rotor coordination core: branded ids, task and
//! result records, the hub event taxonomy, and error classifications.

pub mod errors;
pub mod events;
pub mod ids;
pub mod task;

pub use errors::{RegistryError, SubmitError, TaskErrorKind};
pub use events::HubEvent;
pub use ids::{ConnectionId, SlotId, TaskId};
pub use task::{Priority, Task, TaskKind, TaskResult};
