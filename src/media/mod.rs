//! Frame ordering buffers
//!
//! This module provides:
//! - [`ReorderBuffer`]: per-sender ordering on the relay, gated by sequence
//!   completeness and bounded capacity
//! - [`JitterBuffer`]: per-sender smoothing on the listener, gated by a
//!   minimum queued count

pub mod jitter;
pub mod reorder;

pub use jitter::JitterBuffer;
pub use reorder::{InsertOutcome, ReorderBuffer};
