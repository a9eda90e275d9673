//! Control connection state machine
//!
//! Tracks one control connection from accept to close.

use std::net::SocketAddr;
use std::time::Instant;

use crate::registry::frame::ClientId;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPhase {
    /// Connected; the first line must be REGISTER
    AwaitingRegister,
    /// Registration accepted; commands are dispatched
    Registered { client_id: ClientId, generation: u64 },
    /// Connection finished (terminal)
    Closed,
}

/// Per-connection state
#[derive(Debug)]
pub struct ConnectionState {
    /// Unique connection id
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: ControlPhase,

    /// When the connection was accepted
    pub connected_at: Instant,

    /// When registration completed
    pub registered_at: Option<Instant>,

    /// Lines read from the peer
    pub lines_received: u64,
}

impl ConnectionState {
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            phase: ControlPhase::AwaitingRegister,
            connected_at: Instant::now(),
            registered_at: None,
            lines_received: 0,
        }
    }

    /// Complete registration
    ///
    /// Only valid from `AwaitingRegister`; returns whether the phase changed.
    pub fn on_register(&mut self, client_id: ClientId, generation: u64) -> bool {
        if self.phase != ControlPhase::AwaitingRegister {
            return false;
        }

        self.phase = ControlPhase::Registered {
            client_id,
            generation,
        };
        self.registered_at = Some(Instant::now());
        true
    }

    /// The registered client, if any
    pub fn client(&self) -> Option<(ClientId, u64)> {
        match self.phase {
            ControlPhase::Registered {
                client_id,
                generation,
            } => Some((client_id, generation)),
            _ => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.client().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ControlPhase::Closed
    }

    /// Close the connection; returns the client it was registered as
    pub fn close(&mut self) -> Option<(ClientId, u64)> {
        let client = self.client();
        self.phase = ControlPhase::Closed;
        client
    }

    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}
