//! Open control connections
//!
//! The table is touched by the accept loop, by each handler's cleanup path
//! and by the liveness probe. Iteration works on a snapshot of `Arc`s, so
//! writes to peers never hold the table lock.
//!
//! A write that fails or times out may have left part of a line on the wire.
//! The connection is then closed for good: nothing more is written to it, it
//! leaves the table, and its handler tears the client down.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::error::{Error, Result};
use crate::protocol::ServerMessage;
use crate::registry::frame::ClientId;

/// Write half of a control connection
pub type ControlWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Registered owner of a control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOwner {
    pub client_id: ClientId,
    pub generation: u64,
}

/// Writable side of one control connection
pub struct ControlConnection {
    session_id: u64,
    peer_addr: SocketAddr,
    owner: OnceLock<ConnectionOwner>,
    writer: Mutex<ControlWriter>,
    write_timeout: Duration,
    closed: AtomicBool,
}

impl ControlConnection {
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        writer: ControlWriter,
        write_timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            peer_addr,
            owner: OnceLock::new(),
            writer: Mutex::new(writer),
            write_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Client registered on this connection
    pub fn owner(&self) -> Option<ConnectionOwner> {
        self.owner.get().copied()
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.owner().map(|o| o.client_id)
    }

    /// Bind this connection to a registered client (once)
    pub fn set_owner(&self, owner: ConnectionOwner) -> bool {
        self.owner.set(owner).is_ok()
    }

    /// Write one line, bounded by the write timeout
    ///
    /// Any failure closes the connection; later sends fail immediately.
    pub async fn send(&self, message: &ServerMessage) -> Result<()> {
        let line = format!("{}\n", message);
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let written = tokio::time::timeout(self.write_timeout, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await;

        let result = match written {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => Error::Io(e),
            Err(_) => Error::Timeout,
        };

        self.closed.store(true, Ordering::Release);
        let _ = writer.shutdown().await;
        Err(result)
    }

    /// Whether a write has failed or the connection was shut down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write several lines back to back
    pub async fn send_all(&self, messages: &[ServerMessage]) -> Result<()> {
        for message in messages {
            self.send(message).await?;
        }
        Ok(())
    }

    /// Shut down the write half
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        self.closed.store(true, Ordering::Release);
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for ControlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConnection")
            .field("session_id", &self.session_id)
            .field("peer_addr", &self.peer_addr)
            .field("owner", &self.owner())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Table of registered control connections, keyed by session id
#[derive(Debug, Default)]
pub struct ControlConnections {
    connections: RwLock<HashMap<u64, Arc<ControlConnection>>>,
    presence: Mutex<()>,
}

impl ControlConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise presence changes
    ///
    /// Held around every registry change that is announced to peers together
    /// with its broadcast, and around a new connection's roster snapshot and
    /// insertion, so each peer sees every change exactly once.
    pub async fn presence(&self) -> MutexGuard<'_, ()> {
        self.presence.lock().await
    }

    /// Add a registered connection
    ///
    /// Any older connection bound to the same client id is dropped from the
    /// table and returned.
    pub async fn insert(&self, connection: Arc<ControlConnection>) -> Vec<Arc<ControlConnection>> {
        let client_id = connection.client_id();
        let mut connections = self.connections.write().await;

        let stale: Vec<u64> = connections
            .iter()
            .filter(|(_, c)| client_id.is_some() && c.client_id() == client_id)
            .map(|(id, _)| *id)
            .collect();
        let superseded = stale
            .into_iter()
            .filter_map(|id| connections.remove(&id))
            .collect();

        connections.insert(connection.session_id(), connection);
        superseded
    }

    pub async fn remove(&self, session_id: u64) -> Option<Arc<ControlConnection>> {
        self.connections.write().await.remove(&session_id)
    }

    /// Drop every connection bound to `client_id`
    pub async fn remove_client(&self, client_id: ClientId) -> Vec<Arc<ControlConnection>> {
        let mut connections = self.connections.write().await;
        let ids: Vec<u64> = connections
            .iter()
            .filter(|(_, c)| c.client_id() == Some(client_id))
            .map(|(id, _)| *id)
            .collect();

        ids.into_iter()
            .filter_map(|id| connections.remove(&id))
            .collect()
    }

    pub async fn contains(&self, session_id: u64) -> bool {
        self.connections.read().await.contains_key(&session_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Handles to every connection at this moment
    pub async fn snapshot(&self) -> Vec<Arc<ControlConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Send `message` to every connection except the one owned by `except`
    ///
    /// A connection whose write fails is dropped from the table; its handler
    /// sees it closed and disconnects the client. Returns how many succeeded.
    pub async fn broadcast(&self, message: &ServerMessage, except: Option<ClientId>) -> usize {
        let mut delivered = 0;

        for connection in self.snapshot().await {
            if except.is_some() && connection.client_id() == except {
                continue;
            }
            match connection.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = connection.session_id(),
                        client_id = ?connection.client_id(),
                        error = %e,
                        "Broadcast write failed, dropping connection"
                    );
                    self.remove(connection.session_id()).await;
                }
            }
        }

        delivered
    }

    /// Send `message` to every connection and return those that failed
    pub async fn probe(&self, message: &ServerMessage) -> Vec<(Arc<ControlConnection>, Error)> {
        let mut failed = Vec::new();

        for connection in self.snapshot().await {
            if let Err(e) = connection.send(message).await {
                failed.push((connection, e));
            }
        }

        failed
    }
}
