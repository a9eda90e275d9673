//! Audio frame types
//!
//! Frames are produced by decoding media datagrams and dropped once they are
//! forwarded or evicted from a reorder buffer.

use std::time::Instant;

use bytes::Bytes;

/// Server-assigned client identifier
pub type ClientId = u32;

/// A single audio frame from one sender
///
/// Cheap to clone: the payload is reference-counted `Bytes`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Id the sender claims in the datagram header
    pub sender_id: ClientId,
    /// Sender's sequence number
    pub sequence: u32,
    /// Raw audio payload (empty for keepalives)
    pub payload: Bytes,
    /// When the server received the frame
    pub received_at: Instant,
}

impl AudioFrame {
    /// Create a frame stamped with the current time
    pub fn new(sender_id: ClientId, sequence: u32, payload: Bytes) -> Self {
        Self {
            sender_id,
            sequence,
            payload,
            received_at: Instant::now(),
        }
    }

    /// Keepalive / NAT-punch frame with no audio
    pub fn keepalive(sender_id: ClientId, sequence: u32) -> Self {
        Self::new(sender_id, sequence, Bytes::new())
    }

    /// Whether the frame carries no audio
    pub fn is_keepalive(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
