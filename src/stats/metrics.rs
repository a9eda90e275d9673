//! Relay statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Why a media datagram was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Truncated, oversized or length-mismatched datagram
    Malformed,
    /// Sender id not in the registry
    UnknownSender,
    /// Source address differs from the registered one
    Spoofed,
    /// Sender not `Active` (muted, left or disconnected)
    Inactive,
    /// Older than the sender's expected sequence, or a duplicate
    Stale,
}

/// Server-wide counters, updated lock-free from every task
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    datagrams_received: AtomicU64,
    frames_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unknown: AtomicU64,
    dropped_spoofed: AtomicU64,
    dropped_inactive: AtomicU64,
    dropped_stale: AtomicU64,
    reorder_evictions: AtomicU64,
    registrations: AtomicU64,
    control_connections: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            datagrams_received: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            dropped_unknown: AtomicU64::new(0),
            dropped_spoofed: AtomicU64::new(0),
            dropped_inactive: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
            reorder_evictions: AtomicU64::new(0),
            registrations: AtomicU64::new(0),
            control_connections: AtomicU64::new(0),
        }
    }

    pub fn datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    /// One frame delivered to one peer
    pub fn frame_forwarded(&self, bytes: usize) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &self.dropped_malformed,
            DropReason::UnknownSender => &self.dropped_unknown,
            DropReason::Spoofed => &self.dropped_spoofed,
            DropReason::Inactive => &self.dropped_inactive,
            DropReason::Stale => &self.dropped_stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_evicted(&self) {
        self.reorder_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.control_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturating: a close is never counted without its open
        let _ = self
            .control_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            uptime: self.started_at.elapsed(),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unknown: self.dropped_unknown.load(Ordering::Relaxed),
            dropped_spoofed: self.dropped_spoofed.load(Ordering::Relaxed),
            dropped_inactive: self.dropped_inactive.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            reorder_evictions: self.reorder_evictions.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
            control_connections: self.control_connections.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub uptime: Duration,
    pub datagrams_received: u64,
    pub frames_forwarded: u64,
    pub bytes_forwarded: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown: u64,
    pub dropped_spoofed: u64,
    pub dropped_inactive: u64,
    pub dropped_stale: u64,
    pub reorder_evictions: u64,
    pub registrations: u64,
    pub control_connections: u64,
}

impl RelayStatsSnapshot {
    /// Total datagrams dropped for any reason
    pub fn total_dropped(&self) -> u64 {
        self.dropped_malformed
            + self.dropped_unknown
            + self.dropped_spoofed
            + self.dropped_inactive
            + self.dropped_stale
    }
}
