//! Shared server context
//!
//! Handles passed to every control handler, media worker and the liveness
//! monitor.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::protocol::ServerMessage;
use crate::registry::{ClientId, ClientRegistry, ClientStatus, RegistryError};
use crate::server::config::ServerConfig;
use crate::session::ControlConnections;
use crate::stats::RelayStats;

/// Everything a server task needs, cheap to clone
#[derive(Clone)]
pub struct RelayContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ClientRegistry>,
    pub connections: Arc<ControlConnections>,
    pub media_socket: Arc<UdpSocket>,
    pub stats: Arc<RelayStats>,
    shutdown: watch::Receiver<bool>,
}

impl RelayContext {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<ClientRegistry>,
        media_socket: Arc<UdpSocket>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            registry,
            connections: Arc::new(ControlConnections::new()),
            media_socket,
            stats: Arc::new(RelayStats::new()),
            shutdown,
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once shutdown is requested
    pub async fn shutdown_signal(&self) {
        let mut rx = self.shutdown.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Roster lines for everyone present except `exclude`
    ///
    /// One `PRESENCE ADD` per member, followed by a `MUTE` for each muted one.
    pub async fn roster_messages(&self, exclude: Option<ClientId>) -> Vec<ServerMessage> {
        let roster = self.registry.roster(exclude).await;
        let mut messages = Vec::with_capacity(roster.len());

        for entry in &roster {
            messages.push(ServerMessage::PresenceAdd {
                id: entry.id,
                name: entry.name.clone(),
            });
        }
        for entry in &roster {
            if entry.status == ClientStatus::Muted {
                messages.push(ServerMessage::Mute(entry.id));
            }
        }

        messages
    }

    /// Mark a client disconnected and tell its peers
    ///
    /// `PRESENCE REMOVE` goes out only if the client was `Active`/`Muted`, so a
    /// client that already left is never announced twice. Acts only on the
    /// given generation.
    pub async fn disconnect_client(
        &self,
        client_id: ClientId,
        generation: u64,
    ) -> Result<Option<ClientStatus>, RegistryError> {
        let _presence = self.connections.presence().await;
        let previous = self.registry.disconnect(client_id, generation).await?;

        if previous.is_some_and(ClientStatus::is_present) {
            self.connections
                .broadcast(&ServerMessage::PresenceRemove(client_id), Some(client_id))
                .await;
        }

        Ok(previous)
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("config", &self.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
