//! Media forwarding pipeline
//!
//! The receive loop copies each datagram off the UDP socket and hands it to
//! a worker task; at most `worker_count` workers run at once. Per datagram:
//!
//! 1. decode the 10-byte header and slice the payload
//! 2. look up the sender (unknown ids are dropped)
//! 3. under the sender's record lock: check the source endpoint, refresh
//!    `last_heard`, drop frames from senders that are not `Active` while still
//!    advancing their expected sequence, otherwise insert into the reorder
//!    buffer and drain whatever is now in order
//! 4. send every drained audio frame to each other client that is a forward
//!    target at send time
//!
//! The sender's forwarding lock is held from step 3 through step 4, so its
//! frames leave the relay in sequence order even when several workers handle
//! its datagrams.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::media::InsertOutcome;
use crate::protocol::datagram;
use crate::registry::{AudioFrame, ClientEntry, ClientStatus};
use crate::server::context::RelayContext;
use crate::stats::DropReason;

/// What happened to one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Frames were released from the reorder buffer
    Forwarded {
        /// Audio frames drained (keepalives excluded)
        frames: usize,
        /// Datagrams sent to peers
        deliveries: usize,
    },
    /// Frame is waiting for an earlier sequence
    Buffered,
    /// Frame was discarded
    Dropped(DropReason),
}

/// Per-datagram forwarding logic
#[derive(Debug, Clone)]
pub struct MediaForwarder {
    ctx: RelayContext,
}

impl MediaForwarder {
    pub fn new(ctx: RelayContext) -> Self {
        Self { ctx }
    }

    /// Receive datagrams until shutdown, dispatching each to a worker
    ///
    /// Dispatch never waits for a free worker; datagrams queue on the
    /// semaphore instead.
    pub async fn run(&self, workers: Arc<Semaphore>) {
        let socket = Arc::clone(&self.ctx.media_socket);
        let mut buf = vec![0u8; self.ctx.config.max_datagram];

        loop {
            let (len, source) = tokio::select! {
                _ = self.ctx.shutdown_signal() => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        // Per-datagram errors (e.g. ICMP feedback) never stop the loop
                        tracing::debug!(error = %e, "Media receive failed");
                        continue;
                    }
                },
            };

            let data = Bytes::copy_from_slice(&buf[..len]);
            let forwarder = self.clone();
            let workers = Arc::clone(&workers);

            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                forwarder.process(data, source).await;
            });
        }

        tracing::debug!("Media receive loop stopped");
    }

    /// Run one datagram through the pipeline
    pub async fn process(&self, data: Bytes, source: SocketAddr) -> ForwardOutcome {
        let stats = &self.ctx.stats;
        stats.datagram_received();

        let frame = match datagram::decode(data, self.ctx.config.max_payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(source = %source, error = %e, "Dropping malformed datagram");
                return self.drop_frame(DropReason::Malformed);
            }
        };

        let Some(sender) = self.ctx.registry.get(frame.sender_id).await else {
            tracing::debug!(
                sender_id = frame.sender_id,
                source = %source,
                "Dropping datagram from unknown sender"
            );
            return self.drop_frame(DropReason::UnknownSender);
        };

        let _forwarding = sender.forwarding().await;

        let ready = match self.admit(&sender, frame, source).await {
            Ok(ready) => ready,
            Err(reason) => return self.drop_frame(reason),
        };

        if ready.is_empty() {
            return ForwardOutcome::Buffered;
        }

        let audio: Vec<AudioFrame> = ready.into_iter().filter(|f| !f.is_keepalive()).collect();
        let deliveries = self.fan_out(&sender, &audio).await;

        ForwardOutcome::Forwarded {
            frames: audio.len(),
            deliveries,
        }
    }

    /// Steps under the sender's record lock; returns the frames now in order
    async fn admit(
        &self,
        sender: &ClientEntry,
        frame: AudioFrame,
        source: SocketAddr,
    ) -> Result<Vec<AudioFrame>, DropReason> {
        let mut record = sender.lock().await;

        if record.registered_addr.ip() != source.ip() {
            tracing::warn!(
                client_id = record.id,
                registered = %record.registered_addr.ip(),
                source = %source,
                "Dropping spoofed datagram"
            );
            return Err(DropReason::Spoofed);
        }
        if record.media_addr != source {
            tracing::debug!(
                client_id = record.id,
                old = %record.media_addr,
                new = %source,
                "Media endpoint rebound"
            );
            record.media_addr = source;
        }

        record.touch();

        if record.status() != ClientStatus::Active {
            record.reorder.skip_past(frame.sequence);
            return Err(DropReason::Inactive);
        }

        match record.reorder.insert(frame) {
            InsertOutcome::Buffered => {}
            InsertOutcome::Stale | InsertOutcome::Duplicate => return Err(DropReason::Stale),
            InsertOutcome::Evicted(evicted) => {
                self.ctx.stats.frame_evicted();
                tracing::debug!(
                    client_id = record.id,
                    sequence = evicted.sequence,
                    expected = record.reorder.expected(),
                    "Reorder buffer full, evicted oldest frame"
                );
            }
        }

        Ok(record.reorder.drain_ready())
    }

    /// Send frames to every current forward target except the sender
    async fn fan_out(&self, sender: &ClientEntry, frames: &[AudioFrame]) -> usize {
        if frames.is_empty() {
            return 0;
        }

        let encoded: Vec<Bytes> = frames.iter().map(datagram::encode).collect();
        let peers = self.ctx.registry.snapshot().await;
        let mut deliveries = 0;

        for peer in peers.iter().filter(|p| p.id() != sender.id()) {
            for bytes in &encoded {
                // Re-checked per send: a peer that leaves mid-batch stops receiving
                let target = {
                    let record = peer.lock().await;
                    record.is_forward_target().then_some(record.media_addr)
                };
                let Some(addr) = target else {
                    break;
                };

                match self.ctx.media_socket.send_to(bytes, addr).await {
                    Ok(_) => {
                        deliveries += 1;
                        self.ctx.stats.frame_forwarded(bytes.len());
                    }
                    Err(e) => {
                        tracing::debug!(
                            client_id = peer.id(),
                            addr = %addr,
                            error = %e,
                            "Media send failed"
                        );
                    }
                }
            }
        }

        deliveries
    }

    fn drop_frame(&self, reason: DropReason) -> ForwardOutcome {
        self.ctx.stats.frame_dropped(reason);
        ForwardOutcome::Dropped(reason)
    }
}
