//! Playback jitter buffer
//!
//! The receiving side of the reorder pattern: frames are held in sequence
//! order and released oldest-first once at least `threshold` are queued,
//! which absorbs network jitter before playback. Unlike the server's
//! [`ReorderBuffer`](super::reorder::ReorderBuffer) it never waits for gaps
//! to fill; a missing frame is simply skipped.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::protocol::constants::{JITTER_CAPACITY, JITTER_THRESHOLD};

/// Threshold-triggered ordered buffer for one sender
#[derive(Debug)]
pub struct JitterBuffer {
    queue: BTreeMap<u32, Bytes>,
    capacity: usize,
    threshold: usize,
    last_played: Option<u32>,
    dropped: u64,
}

impl JitterBuffer {
    /// Create a buffer with default capacity and threshold
    pub fn new() -> Self {
        Self::with_limits(JITTER_CAPACITY, JITTER_THRESHOLD)
    }

    /// Create a buffer with explicit limits
    pub fn with_limits(capacity: usize, threshold: usize) -> Self {
        Self {
            queue: BTreeMap::new(),
            capacity: capacity.max(1),
            threshold: threshold.max(1),
            last_played: None,
            dropped: 0,
        }
    }

    /// Queue a frame
    ///
    /// Returns `false` if the frame was dropped: buffer full, or the frame
    /// is no newer than the last one played.
    pub fn push(&mut self, sequence: u32, payload: Bytes) -> bool {
        if self.last_played.is_some_and(|last| sequence <= last) {
            self.dropped += 1;
            return false;
        }
        if self.queue.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }

        self.queue.insert(sequence, payload);
        true
    }

    /// Take the oldest frame if enough are queued
    pub fn pop_ready(&mut self) -> Option<(u32, Bytes)> {
        if self.queue.len() < self.threshold {
            return None;
        }

        let (seq, payload) = self.queue.pop_first()?;
        self.last_played = Some(seq);
        Some((seq, payload))
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Frames refused since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(b: u8) -> Bytes {
        Bytes::from(vec![b; 2])
    }

    #[test]
    fn test_waits_for_threshold() {
        let mut buf = JitterBuffer::with_limits(10, 2);

        buf.push(0, payload(0));
        assert!(buf.pop_ready().is_none());

        buf.push(1, payload(1));
        assert_eq!(buf.pop_ready().map(|(s, _)| s), Some(0));
        // One left, below threshold
        assert!(buf.pop_ready().is_none());
    }

    #[test]
    fn test_emits_oldest_first() {
        let mut buf = JitterBuffer::with_limits(10, 1);

        buf.push(5, payload(5));
        buf.push(3, payload(3));
        buf.push(4, payload(4));

        let order: Vec<u32> = std::iter::from_fn(|| buf.pop_ready().map(|(s, _)| s)).collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn test_late_frame_dropped_after_playback() {
        let mut buf = JitterBuffer::with_limits(10, 1);

        buf.push(7, payload(7));
        buf.pop_ready();

        assert!(!buf.push(6, payload(6)));
        assert!(buf.push(8, payload(8)));
        assert_eq!(buf.dropped(), 1);
    }

    #[test]
    fn test_capacity_refuses_new_frames() {
        let mut buf = JitterBuffer::with_limits(2, 2);

        assert!(buf.push(0, payload(0)));
        assert!(buf.push(1, payload(1)));
        assert!(!buf.push(2, payload(2)));
        assert_eq!(buf.len(), 2);
    }
}
