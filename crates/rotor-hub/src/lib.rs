//! Connection broadcast hub.
//!
//! Long-lived client connections register here, subscribe to topic keys, and
//! receive serialized [`rotor_core::HubEvent`]s pushed by producers. A
//! liveness monitor evicts connections that go quiet; a failed send evicts on
//! the spot. Transports hand each connection's receiver to their writer task
//! and call [`BroadcastHub::touch`] on inbound traffic.

pub mod config;
pub mod connection;
pub mod control;
pub mod hub;
pub mod liveness;

pub use config::HubConfig;
pub use connection::{Connection, ConnectionRegistry, EvictionReason, SendStatus};
pub use control::{apply_control, ControlError, ControlMessage};
pub use hub::{BroadcastHub, HubStats};
pub use liveness::start_liveness_monitor;
