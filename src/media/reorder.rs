//! Per-sender reorder buffer
//!
//! Reconstructs a strictly increasing sequence from datagrams that arrive out
//! of order. Frames wait in a bounded ordered map until the next expected
//! sequence number is present, then drain in order.
//!
//! ```text
//!  expected = 3
//!  pending:  [4] [5]    [7]
//!  insert 3 -> drain 3, 4, 5 -> expected = 6, pending: [7]
//! ```
//!
//! When the buffer is full the lowest-keyed frame is evicted and the expected
//! sequence skips past it, so a permanent gap cannot stall delivery forever.
//!
//! The expected position is tracked as a `u64` so it never wraps: once
//! `u32::MAX` has been emitted the position is `2^32` and every further frame
//! is stale until the sender re-registers.

use std::collections::BTreeMap;

use crate::registry::frame::AudioFrame;

/// Result of inserting a frame
#[derive(Debug)]
pub enum InsertOutcome {
    /// Frame is waiting in the buffer
    Buffered,
    /// Frame was older than the expected sequence and discarded
    Stale,
    /// A frame with the same sequence was already buffered
    Duplicate,
    /// Frame was buffered, and the oldest entry was evicted to make room
    Evicted(AudioFrame),
}

/// Bounded ordered buffer keyed by sequence number
#[derive(Debug)]
pub struct ReorderBuffer {
    pending: BTreeMap<u32, AudioFrame>,
    expected: u64,
    capacity: usize,
    evictions: u64,
}

impl ReorderBuffer {
    /// Create an empty buffer holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            expected: 0,
            capacity: capacity.max(1),
            evictions: 0,
        }
    }

    /// Next sequence number the buffer will emit (`2^32` once exhausted)
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Number of frames waiting
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no frames are waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Maximum number of frames held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames evicted since creation or the last reset
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Insert a frame keyed by its sequence number
    pub fn insert(&mut self, frame: AudioFrame) -> InsertOutcome {
        let seq = frame.sequence;

        if u64::from(seq) < self.expected {
            return InsertOutcome::Stale;
        }
        if self.pending.contains_key(&seq) {
            return InsertOutcome::Duplicate;
        }

        self.pending.insert(seq, frame);

        if self.pending.len() > self.capacity {
            if let Some((oldest, evicted)) = self.pending.pop_first() {
                self.evictions += 1;
                self.expected = self.expected.max(u64::from(oldest) + 1);
                return InsertOutcome::Evicted(evicted);
            }
        }

        InsertOutcome::Buffered
    }

    /// Remove and return every frame that is now in order
    ///
    /// Advances the expected sequence once per drained frame.
    pub fn drain_ready(&mut self) -> Vec<AudioFrame> {
        let mut ready = Vec::new();

        while let Ok(seq) = u32::try_from(self.expected) {
            let Some(frame) = self.pending.remove(&seq) else {
                break;
            };
            self.expected += 1;
            ready.push(frame);
        }

        ready
    }

    /// Advance the expected sequence to at least `next`
    ///
    /// Never rewinds. Buffered frames that fall behind the new position are
    /// discarded since they can no longer be emitted in order.
    pub fn skip_to(&mut self, next: u64) {
        if next <= self.expected {
            return;
        }

        self.expected = next;
        match u32::try_from(next) {
            Ok(seq) => self.pending = self.pending.split_off(&seq),
            Err(_) => self.pending.clear(),
        }
    }

    /// Advance the expected sequence past `seq`
    pub fn skip_past(&mut self, seq: u32) {
        self.skip_to(u64::from(seq) + 1);
    }

    /// Clear all state (used on re-registration)
    pub fn reset(&mut self) {
        self.pending.clear();
        self.expected = 0;
        self.evictions = 0;
    }
}
