//! Client media helpers
//!
//! [`MediaSender`] stamps outgoing audio with the 10-byte header and an
//! incrementing sequence. [`MediaReceiver`] decodes relayed datagrams and
//! smooths each sender's stream through its own [`JitterBuffer`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::Result;
use crate::media::JitterBuffer;
use crate::protocol::constants::MAX_DATAGRAM_SIZE;
use crate::protocol::{datagram, ServerMessage};
use crate::registry::frame::ClientId;

/// Outbound half of a client's media socket
#[derive(Debug)]
pub struct MediaSender {
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    client_id: ClientId,
    next_sequence: u32,
    muted: Arc<AtomicBool>,
    last_sent: Option<Instant>,
    keepalive_interval: Duration,
}

impl MediaSender {
    pub fn new(
        socket: Arc<UdpSocket>,
        relay: SocketAddr,
        client_id: ClientId,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            socket,
            relay,
            client_id,
            next_sequence: 0,
            muted: Arc::new(AtomicBool::new(false)),
            last_sent: None,
            keepalive_interval,
        }
    }

    /// Send one audio frame
    ///
    /// Returns `false` without sending while muted.
    pub async fn send(&mut self, payload: &[u8]) -> Result<bool> {
        if self.is_muted() {
            return Ok(false);
        }

        self.send_datagram(payload).await?;
        Ok(true)
    }

    /// Send a zero-length keepalive
    ///
    /// Keepalives consume a sequence number so the relay's expected sequence
    /// keeps pace with the sender.
    pub async fn send_keepalive(&mut self) -> Result<()> {
        self.send_datagram(&[]).await
    }

    /// Send a keepalive if muted and nothing went out for `keepalive_interval`
    pub async fn tick(&mut self) -> Result<bool> {
        if !self.is_muted() {
            return Ok(false);
        }

        let due = self
            .last_sent
            .map_or(true, |sent| sent.elapsed() >= self.keepalive_interval);
        if due {
            self.send_keepalive().await?;
        }
        Ok(due)
    }

    async fn send_datagram(&mut self, payload: &[u8]) -> Result<()> {
        let data = datagram::encode_parts(self.client_id, self.next_sequence, payload);
        self.socket.send_to(&data, self.relay).await?;

        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.last_sent = Some(Instant::now());
        Ok(())
    }

    /// Shared mute flag, for toggling from the control side
    pub fn mute_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.muted)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Sequence number of the next datagram
    pub fn sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }
}

/// Inbound half of a client's media socket
#[derive(Debug)]
pub struct MediaReceiver {
    socket: Arc<UdpSocket>,
    max_payload: usize,
    buffers: HashMap<ClientId, JitterBuffer>,
    capacity: usize,
    threshold: usize,
    buf: Vec<u8>,
}

impl MediaReceiver {
    pub fn new(socket: Arc<UdpSocket>, max_payload: usize, capacity: usize, threshold: usize) -> Self {
        Self {
            socket,
            max_payload,
            buffers: HashMap::new(),
            capacity,
            threshold,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Wait for one datagram and queue it
    ///
    /// Returns the sender id when an audio frame was queued.
    pub async fn recv(&mut self) -> Result<Option<ClientId>> {
        let len = self.socket.recv(&mut self.buf).await?;
        let data = Bytes::copy_from_slice(&self.buf[..len]);
        Ok(self.push_datagram(data))
    }

    /// Decode and queue a datagram
    ///
    /// Malformed datagrams and keepalives are dropped.
    pub fn push_datagram(&mut self, data: Bytes) -> Option<ClientId> {
        let frame = match datagram::decode(data, self.max_payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::trace!(error = %e, "Dropping malformed media datagram");
                return None;
            }
        };
        if frame.is_keepalive() {
            return None;
        }

        let (capacity, threshold) = (self.capacity, self.threshold);
        let sender = frame.sender_id;
        let queued = self
            .buffers
            .entry(sender)
            .or_insert_with(|| JitterBuffer::with_limits(capacity, threshold))
            .push(frame.sequence, frame.payload);

        queued.then_some(sender)
    }

    /// Take the next playable frame from every sender that has one
    pub fn pop_ready(&mut self) -> Vec<(ClientId, Bytes)> {
        let mut ready: Vec<(ClientId, Bytes)> = self
            .buffers
            .iter_mut()
            .filter_map(|(id, buffer)| buffer.pop_ready().map(|(_, payload)| (*id, payload)))
            .collect();
        ready.sort_by_key(|(id, _)| *id);
        ready
    }

    /// Forget a sender (e.g. after `PRESENCE REMOVE`)
    pub fn remove_sender(&mut self, sender: ClientId) -> bool {
        self.buffers.remove(&sender).is_some()
    }

    /// Track membership changes from the control channel
    ///
    /// A re-registered sender keeps its id but restarts its sequence at 0, so
    /// its buffer is dropped on `PRESENCE ADD` as well as `PRESENCE REMOVE`.
    /// Returns whether a buffer was dropped.
    pub fn apply_event(&mut self, event: &ServerMessage) -> bool {
        match event {
            ServerMessage::PresenceAdd { id, .. } | ServerMessage::PresenceRemove(id) => {
                self.remove_sender(*id)
            }
            _ => false,
        }
    }

    /// Frames queued for `sender`
    pub fn queued(&self, sender: ClientId) -> usize {
        self.buffers.get(&sender).map_or(0, JitterBuffer::len)
    }

    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }
}
