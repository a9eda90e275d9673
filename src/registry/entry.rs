//! Client record and status types
//!
//! This module defines the per-client state stored in the registry.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::media::reorder::ReorderBuffer;

use super::error::RegistryError;
use super::frame::ClientId;

/// Participation status of a client
///
/// Transitions:
///
/// ```text
///   Active <──> Muted
///     │ ▲         │
///     ▼ │ (JOIN)  │
///    Left <───────┘
///     │
///     ▼
///  Disconnected ──> removed   (reachable from every other status)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientStatus {
    /// Sending and receiving audio
    Active,
    /// Receiving audio, outbound suppressed
    Muted,
    /// Explicitly left; control connection still open
    Left,
    /// Control connection lost or media timed out
    Disconnected,
}

impl ClientStatus {
    /// Whether the transition table permits moving from `self` to `to`
    pub fn can_transition(self, to: ClientStatus) -> bool {
        use ClientStatus::*;

        matches!(
            (self, to),
            (Active, Muted)
                | (Muted, Active)
                | (Active, Left)
                | (Muted, Left)
                | (Left, Active)
                | (Active, Disconnected)
                | (Muted, Disconnected)
                | (Left, Disconnected)
        )
    }

    /// Whether the client is part of the call roster
    pub fn is_present(self) -> bool {
        matches!(self, ClientStatus::Active | ClientStatus::Muted)
    }

    /// Whether the client should receive other participants' audio
    pub fn receives_audio(self) -> bool {
        self.is_present()
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Active => "ACTIVE",
            ClientStatus::Muted => "MUTED",
            ClientStatus::Left => "LEFT",
            ClientStatus::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

/// State for one registered participant
#[derive(Debug)]
pub struct ClientRecord {
    /// Server-assigned id
    pub id: ClientId,

    /// Display name, unique among present clients at assignment time
    pub name: String,

    /// Endpoint declared at registration (TCP peer address + REGISTER port)
    pub registered_addr: SocketAddr,

    /// Last observed UDP endpoint; the port follows NAT rebinding
    pub media_addr: SocketAddr,

    /// Bumped on every re-registration of this id
    pub generation: u64,

    /// Ordering state for this client's outbound frames
    pub reorder: ReorderBuffer,

    /// Last accepted media frame (or registration)
    pub last_heard: Instant,

    /// When the record entered `Disconnected`
    pub disconnected_at: Option<Instant>,

    /// When the record was (re-)registered
    pub registered_at: Instant,

    status: ClientStatus,
}

impl ClientRecord {
    /// Create a freshly registered, active record
    pub fn new(id: ClientId, name: String, media_addr: SocketAddr, reorder_capacity: usize) -> Self {
        let now = Instant::now();

        Self {
            id,
            name,
            registered_addr: media_addr,
            media_addr,
            generation: 0,
            reorder: ReorderBuffer::new(reorder_capacity),
            last_heard: now,
            disconnected_at: None,
            registered_at: now,
            status: ClientStatus::Active,
        }
    }

    /// Current status
    pub fn status(&self) -> ClientStatus {
        self.status
    }

    /// Move to `to` if the transition table allows it
    ///
    /// Returns the previous status. Re-entering the current status is a no-op.
    pub fn transition(&mut self, to: ClientStatus) -> Result<ClientStatus, RegistryError> {
        let from = self.status;

        if from == to {
            return Ok(from);
        }
        if !from.can_transition(to) {
            return Err(RegistryError::InvalidTransition { from, to });
        }

        self.status = to;
        if to == ClientStatus::Disconnected {
            self.disconnected_at = Some(Instant::now());
        }

        Ok(from)
    }

    /// Mark disconnected; returns the previous status, or `None` if already disconnected
    pub fn mark_disconnected(&mut self) -> Option<ClientStatus> {
        match self.transition(ClientStatus::Disconnected) {
            Ok(ClientStatus::Disconnected) | Err(_) => None,
            Ok(prev) => Some(prev),
        }
    }

    /// Reset for a re-registration of the same id
    ///
    /// Sequence state is cleared and the status forced back to `Active`.
    pub fn reregister(&mut self, name: String) {
        let now = Instant::now();

        self.name = name;
        self.media_addr = self.registered_addr;
        self.generation += 1;
        self.reorder.reset();
        self.status = ClientStatus::Active;
        self.last_heard = now;
        self.disconnected_at = None;
        self.registered_at = now;
    }

    /// Record that a media frame was accepted
    pub fn touch(&mut self) {
        self.last_heard = Instant::now();
    }

    /// Whether no media has arrived for longer than `timeout`
    pub fn is_silent(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heard) > timeout
    }

    /// Whether a disconnected record has outlived its grace period
    pub fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        if self.status != ClientStatus::Disconnected {
            return false;
        }

        let since = self.disconnected_at.map_or(self.last_heard, |at| at.max(self.last_heard));
        now.saturating_duration_since(since) > grace
    }

    /// Whether this record should receive forwarded audio
    pub fn is_forward_target(&self) -> bool {
        self.status.receives_audio() && self.media_addr.port() != 0
    }
}

/// Registry slot for one client
///
/// The record lock serialises every mutation of one client's fields. The
/// forwarding lock is held by the media pipeline while it drains and sends
/// this client's frames, so one sender's output is never interleaved out of
/// order. Lock order is forwarding lock, then at most one record lock at a
/// time.
#[derive(Debug)]
pub struct ClientEntry {
    id: ClientId,
    record: Mutex<ClientRecord>,
    forwarding: Mutex<()>,
}

impl ClientEntry {
    pub(super) fn new(record: ClientRecord) -> Self {
        Self {
            id: record.id,
            record: Mutex::new(record),
            forwarding: Mutex::new(()),
        }
    }

    /// Client id (immutable, readable without locking)
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Lock the record for reading or mutation
    pub async fn lock(&self) -> MutexGuard<'_, ClientRecord> {
        self.record.lock().await
    }

    /// Try to lock the record without waiting
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ClientRecord>> {
        self.record.try_lock().ok()
    }

    /// Acquire this sender's forwarding lock
    pub async fn forwarding(&self) -> MutexGuard<'_, ()> {
        self.forwarding.lock().await
    }

    /// Current status
    pub async fn status(&self) -> ClientStatus {
        self.lock().await.status()
    }

    /// Apply a status transition under the record lock
    pub async fn transition(&self, to: ClientStatus) -> Result<ClientStatus, RegistryError> {
        self.lock().await.transition(to)
    }
}
