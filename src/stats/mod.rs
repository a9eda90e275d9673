//! Relay statistics

pub mod metrics;

pub use metrics::{DropReason, RelayStats, RelayStatsSnapshot};
