//! Push channel: one WebSocket per session, fed by the pipeline through the
//! [`ConnectionManager`] sink.

pub mod connection;
pub mod heartbeat;
pub mod manager;

pub use connection::{Connection, PushError};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatState};
pub use manager::ConnectionManager;
