//! Control session management
//!
//! Per-connection lifecycle state and the table of open control connections
//! used for presence broadcasts.

pub mod connections;
pub mod state;

pub use connections::{ConnectionOwner, ControlConnection, ControlConnections, ControlWriter};
pub use state::{ConnectionState, ControlPhase};
