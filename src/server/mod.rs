//! Relay server
//!
//! ```text
//!   TCP accept loop ──> ControlHandler (one task per connection)
//!   UDP receive loop ──> MediaForwarder workers (bounded)
//!   LivenessMonitor (interval task)
//! ```
//!
//! All three share one [`RelayContext`].

pub mod config;
pub mod context;
pub mod control;
pub mod forwarder;
pub mod listener;
pub mod monitor;

pub use config::ServerConfig;
pub use context::RelayContext;
pub use control::ControlHandler;
pub use forwarder::{ForwardOutcome, MediaForwarder};
pub use listener::RelayServer;
pub use monitor::LivenessMonitor;
