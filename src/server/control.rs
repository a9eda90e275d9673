//! Control connection handler
//!
//! One handler runs per accepted TCP connection:
//!
//! ```text
//!   AwaitingRegister ──REGISTER──> Registered ──EOF / I/O error──> Closed
//!          │                          │  JOIN LEAVE MUTE UNMUTE SYNC
//!          └──anything else──> ERROR, Closed
//! ```
//!
//! Every presence change is applied to the registry and broadcast while the
//! connection table's presence lock is held.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::MAX_CONTROL_LINE;
use crate::protocol::{Command, ServerMessage};
use crate::registry::{ClientEntry, ClientStatus, RegistryError};
use crate::server::context::RelayContext;
use crate::session::{ConnectionOwner, ConnectionState, ControlConnection};

/// Handler for a single control connection
pub struct ControlHandler {
    ctx: RelayContext,
    state: ConnectionState,
    reader: BufReader<OwnedReadHalf>,
    connection: Arc<ControlConnection>,
    line: Vec<u8>,
}

impl ControlHandler {
    pub fn new(ctx: RelayContext, session_id: u64, socket: TcpStream, peer_addr: SocketAddr) -> Self {
        let (read_half, write_half) = socket.into_split();
        let connection = Arc::new(ControlConnection::new(
            session_id,
            peer_addr,
            Box::new(write_half),
            ctx.config.write_timeout,
        ));

        Self {
            ctx,
            state: ConnectionState::new(session_id, peer_addr),
            reader: BufReader::new(read_half),
            connection,
            line: Vec::with_capacity(128),
        }
    }

    /// Serve the connection until the peer leaves, an I/O error occurs or
    /// the server shuts down
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        self.cleanup().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let Some(line) = self.next_line().await? else {
            return Ok(());
        };

        match Command::parse(&line) {
            Ok(Command::Register { udp_port, name }) => {
                self.register(udp_port, name.as_deref()).await?;
            }
            Ok(other) => {
                return self
                    .reject(format!("expected REGISTER, got {}", other))
                    .await;
            }
            Err(e) => return self.reject(e.to_string()).await,
        }

        while let Some(line) = self.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            match Command::parse(&line) {
                Ok(command) => self.dispatch(command).await?,
                Err(e) => {
                    tracing::debug!(
                        session_id = self.state.session_id,
                        error = %e,
                        "Invalid control line"
                    );
                    self.connection
                        .send(&ServerMessage::Error(e.to_string()))
                        .await?;
                }
            }
        }

        Ok(())
    }

    /// Read the next line, polling for shutdown every read timeout
    ///
    /// Returns `None` on EOF or shutdown, and an error once a broadcast write
    /// has closed the connection.
    async fn next_line(&mut self) -> Result<Option<String>> {
        let read_timeout = self.ctx.config.read_timeout;

        loop {
            if self.ctx.is_shutting_down() {
                return Ok(None);
            }
            if self.connection.is_closed() {
                return Err(Error::ConnectionClosed);
            }

            let (consumed, complete) =
                match tokio::time::timeout(read_timeout, self.reader.fill_buf()).await {
                    Err(_) => continue,
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok(available)) => match available.iter().position(|b| *b == b'\n') {
                        Some(pos) => {
                            self.line.extend_from_slice(&available[..pos]);
                            (pos + 1, true)
                        }
                        None => {
                            self.line.extend_from_slice(available);
                            (available.len(), false)
                        }
                    },
                };

            if consumed == 0 {
                // EOF; a trailing unterminated line still counts
                if self.line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }
            self.reader.consume(consumed);

            if self.line.len() > MAX_CONTROL_LINE {
                return Err(ProtocolError::LineTooLong {
                    max: MAX_CONTROL_LINE,
                }
                .into());
            }
            if complete {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        self.state.lines_received += 1;
        let line = String::from_utf8_lossy(&self.line)
            .trim_end_matches('\r')
            .to_string();
        self.line.clear();
        line
    }

    /// Reply with an error and close without touching the registry
    async fn reject(&mut self, reason: String) -> Result<()> {
        tracing::debug!(
            session_id = self.state.session_id,
            peer = %self.state.peer_addr,
            reason = %reason,
            "Registration rejected"
        );
        self.connection.send(&ServerMessage::Error(reason)).await?;
        self.connection.shutdown().await;
        Ok(())
    }

    async fn register(&mut self, udp_port: u16, name: Option<&str>) -> Result<()> {
        let ctx = self.ctx.clone();
        let _presence = ctx.connections.presence().await;

        let registration = ctx
            .registry
            .register(self.state.peer_addr.ip(), udp_port, name)
            .await;
        let client_id = registration.id;

        self.state.on_register(client_id, registration.generation);
        self.connection.set_owner(ConnectionOwner {
            client_id,
            generation: registration.generation,
        });
        ctx.stats.client_registered();

        self.connection.send(&ServerMessage::Ok(client_id)).await?;

        // A reused record that was still present is announced afresh
        if registration.previous.is_some_and(ClientStatus::is_present) {
            ctx.connections
                .broadcast(&ServerMessage::PresenceRemove(client_id), Some(client_id))
                .await;
        }
        ctx.connections
            .broadcast(
                &ServerMessage::PresenceAdd {
                    id: client_id,
                    name: registration.name.clone(),
                },
                Some(client_id),
            )
            .await;

        let roster = ctx.roster_messages(Some(client_id)).await;
        self.connection.send_all(&roster).await?;

        for old in ctx.connections.insert(Arc::clone(&self.connection)).await {
            tracing::debug!(
                client_id = client_id,
                old_session_id = old.session_id(),
                "Closing superseded control connection"
            );
            old.shutdown().await;
        }

        tracing::info!(
            session_id = self.state.session_id,
            client_id = client_id,
            name = %registration.name,
            udp_port = udp_port,
            reused = registration.reused(),
            "Control connection registered"
        );

        Ok(())
    }

    /// The registry entry this connection still owns
    async fn owned_entry(&self) -> Result<Arc<ClientEntry>> {
        let Some((client_id, generation)) = self.state.client() else {
            return Err(Error::ConnectionClosed);
        };

        let entry = self
            .ctx
            .registry
            .get(client_id)
            .await
            .ok_or(RegistryError::UnknownClient(client_id))?;

        if entry.lock().await.generation != generation {
            return Err(RegistryError::Superseded(client_id).into());
        }
        Ok(entry)
    }

    async fn dispatch(&mut self, command: Command) -> Result<()> {
        let entry = self.owned_entry().await?;
        let client_id = entry.id();

        tracing::debug!(
            session_id = self.state.session_id,
            client_id = client_id,
            command = %command,
            "Control command"
        );

        match command {
            Command::Register { .. } => {
                self.connection
                    .send(&ServerMessage::Error("already registered".into()))
                    .await
            }
            Command::Join => self.join(&entry).await,
            Command::Leave => self.leave(&entry).await,
            Command::Mute => self.set_muted(&entry, true).await,
            Command::Unmute => self.set_muted(&entry, false).await,
            Command::Sync => {
                let roster = self.ctx.roster_messages(Some(client_id)).await;
                self.connection.send_all(&roster).await
            }
        }
    }

    async fn join(&self, entry: &ClientEntry) -> Result<()> {
        let _presence = self.ctx.connections.presence().await;

        let (result, name) = {
            let mut record = entry.lock().await;
            (record.transition(ClientStatus::Active), record.name.clone())
        };

        match result {
            Ok(ClientStatus::Left) => {
                tracing::info!(client_id = entry.id(), "Client rejoined");
                self.ctx
                    .connections
                    .broadcast(
                        &ServerMessage::PresenceAdd {
                            id: entry.id(),
                            name,
                        },
                        Some(entry.id()),
                    )
                    .await;
                Ok(())
            }
            Ok(ClientStatus::Muted) => {
                self.ctx
                    .connections
                    .broadcast(&ServerMessage::Unmute(entry.id()), Some(entry.id()))
                    .await;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => self.refuse(e).await,
        }
    }

    async fn leave(&self, entry: &ClientEntry) -> Result<()> {
        let _presence = self.ctx.connections.presence().await;

        match entry.transition(ClientStatus::Left).await {
            Ok(previous) if previous.is_present() => {
                tracing::info!(client_id = entry.id(), "Client left");
                self.ctx
                    .connections
                    .broadcast(&ServerMessage::PresenceRemove(entry.id()), Some(entry.id()))
                    .await;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => self.refuse(e).await,
        }
    }

    async fn set_muted(&self, entry: &ClientEntry, muted: bool) -> Result<()> {
        let _presence = self.ctx.connections.presence().await;

        let (to, notice) = if muted {
            (ClientStatus::Muted, ServerMessage::Mute(entry.id()))
        } else {
            (ClientStatus::Active, ServerMessage::Unmute(entry.id()))
        };

        let result = {
            let mut record = entry.lock().await;
            let from = record.status();
            // UNMUTE never rejoins a client that left
            if !muted && !from.is_present() {
                Err(RegistryError::InvalidTransition { from, to })
            } else {
                record.transition(to)
            }
        };

        match result {
            Ok(previous) if previous != to => {
                self.ctx
                    .connections
                    .broadcast(&notice, Some(entry.id()))
                    .await;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => self.refuse(e).await,
        }
    }

    async fn refuse(&self, error: RegistryError) -> Result<()> {
        tracing::debug!(
            session_id = self.state.session_id,
            error = %error,
            "Command refused"
        );
        self.connection
            .send(&ServerMessage::Error(error.to_string()))
            .await
    }

    async fn cleanup(&mut self) {
        let session_id = self.state.session_id;
        self.ctx.connections.remove(session_id).await;

        if let Some((client_id, generation)) = self.state.close() {
            match self.ctx.disconnect_client(client_id, generation).await {
                Ok(Some(previous)) => {
                    tracing::info!(
                        session_id = session_id,
                        client_id = client_id,
                        previous = %previous,
                        "Client disconnected"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(
                        session_id = session_id,
                        client_id = client_id,
                        error = %e,
                        "Skipping disconnect"
                    );
                }
            }
        }

        self.connection.shutdown().await;

        tracing::debug!(
            session_id = session_id,
            lines = self.state.lines_received,
            duration_ms = self.state.duration().as_millis() as u64,
            "Control connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::tcp::OwnedWriteHalf;
    use tokio::net::{TcpListener, UdpSocket};
    use tokio::sync::watch;

    use super::*;
    use crate::registry::ClientRegistry;
    use crate::server::config::ServerConfig;

    async fn start() -> (RelayContext, SocketAddr, watch::Sender<bool>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let config = ServerConfig::loopback().read_timeout(Duration::from_millis(50));
        let ctx = RelayContext::new(
            Arc::new(config),
            Arc::new(ClientRegistry::new()),
            Arc::new(socket),
            rx,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut session_id = 0;
            while let Ok((socket, peer)) = listener.accept().await {
                session_id += 1;
                let handler = ControlHandler::new(accept_ctx.clone(), session_id, socket, peer);
                tokio::spawn(handler.run());
            }
        });

        (ctx, addr, tx)
    }

    struct Peer {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Peer {
        async fn connect(addr: SocketAddr) -> Self {
            let (read_half, writer) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                reader: BufReader::new(read_half),
                writer,
            }
        }

        async fn register(addr: SocketAddr, udp_port: u16, name: &str) -> Self {
            let mut peer = Self::connect(addr).await;
            peer.send(&format!("REGISTER {} {}", udp_port, name)).await;
            assert!(peer.recv().await.unwrap().starts_with("OK "));
            peer
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
        }

        /// Next line, or `None` on EOF
        async fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a control line")
                .unwrap();
            (n > 0).then(|| line.trim_end().to_string())
        }
    }

    #[tokio::test]
    async fn test_first_line_must_register() {
        let (ctx, addr, _tx) = start().await;
        let mut peer = Peer::connect(addr).await;

        peer.send("JOIN").await;
        assert!(peer.recv().await.unwrap().starts_with("ERROR "));
        assert_eq!(peer.recv().await, None);
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_register_rejected() {
        let (ctx, addr, _tx) = start().await;
        let mut peer = Peer::connect(addr).await;

        peer.send("REGISTER notaport alice").await;
        assert_eq!(
            peer.recv().await.unwrap(),
            "ERROR invalid UDP port: notaport"
        );
        assert_eq!(peer.recv().await, None);
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_announces_and_sends_roster() {
        let (_ctx, addr, _tx) = start().await;

        let mut alice = Peer::connect(addr).await;
        alice.send("REGISTER 40000 alice").await;
        assert_eq!(alice.recv().await.unwrap(), "OK 1");

        let mut bob = Peer::connect(addr).await;
        bob.send("REGISTER 40001 bob").await;
        assert_eq!(bob.recv().await.unwrap(), "OK 2");
        assert_eq!(bob.recv().await.unwrap(), "PRESENCE ADD 1 alice");

        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 2 bob");
    }

    #[tokio::test]
    async fn test_leave_and_rejoin_presence() {
        let (ctx, addr, _tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;
        let mut bob = Peer::register(addr, 40001, "bob").await;
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 2 bob");
        assert_eq!(bob.recv().await.unwrap(), "PRESENCE ADD 1 alice");

        // JOIN while already active is silent
        alice.send("JOIN").await;
        alice.send("LEAVE").await;
        assert_eq!(bob.recv().await.unwrap(), "PRESENCE REMOVE 1");
        assert_eq!(
            ctx.registry.get(1).await.unwrap().status().await,
            ClientStatus::Left
        );

        alice.send("JOIN").await;
        assert_eq!(bob.recv().await.unwrap(), "PRESENCE ADD 1 alice");

        alice.send("MUTE").await;
        assert_eq!(bob.recv().await.unwrap(), "MUTE 1");
        alice.send("UNMUTE").await;
        assert_eq!(bob.recv().await.unwrap(), "UNMUTE 1");
    }

    #[tokio::test]
    async fn test_disconnect_after_leave_sends_no_second_remove() {
        let (ctx, addr, _tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;
        let mut bob = Peer::register(addr, 40001, "bob").await;
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 2 bob");

        bob.send("LEAVE").await;
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE REMOVE 2");

        drop(bob);

        // Next event alice sees comes from a third client, not a duplicate REMOVE
        let _carol = Peer::register(addr, 40002, "carol").await;
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 3 carol");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            ctx.registry.get(2).await.unwrap().status().await,
            ClientStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_disconnect_announces_remove() {
        let (_ctx, addr, _tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;
        let bob = Peer::register(addr, 40001, "bob").await;
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 2 bob");

        drop(bob);
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE REMOVE 2");
    }

    #[tokio::test]
    async fn test_closed_connection_disconnects_client() {
        let (ctx, addr, _tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;
        let _bob = Peer::register(addr, 40001, "bob").await;
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 2 bob");

        // Registration finishes under the presence lock
        drop(ctx.connections.presence().await);

        // What a failed broadcast write leaves behind
        let bob_conn = ctx
            .connections
            .snapshot()
            .await
            .into_iter()
            .find(|c| c.client_id() == Some(2))
            .unwrap();
        ctx.connections.remove(bob_conn.session_id()).await;
        bob_conn.shutdown().await;

        assert_eq!(alice.recv().await.unwrap(), "PRESENCE REMOVE 2");
        assert_eq!(
            ctx.registry.get(2).await.unwrap().status().await,
            ClientStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn test_invalid_transitions_reply_error() {
        let (_ctx, addr, _tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;

        alice.send("LEAVE").await;
        alice.send("MUTE").await;
        assert!(alice.recv().await.unwrap().starts_with("ERROR "));
        alice.send("UNMUTE").await;
        assert!(alice.recv().await.unwrap().starts_with("ERROR "));

        alice.send("FROBNICATE").await;
        assert_eq!(
            alice.recv().await.unwrap(),
            "ERROR unknown command: FROBNICATE"
        );
    }

    #[tokio::test]
    async fn test_sync_returns_roster_with_mutes() {
        let (_ctx, addr, _tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;
        let mut bob = Peer::register(addr, 40001, "bob").await;
        assert_eq!(bob.recv().await.unwrap(), "PRESENCE ADD 1 alice");
        assert_eq!(alice.recv().await.unwrap(), "PRESENCE ADD 2 bob");

        alice.send("MUTE").await;
        assert_eq!(bob.recv().await.unwrap(), "MUTE 1");

        bob.send("SYNC").await;
        assert_eq!(bob.recv().await.unwrap(), "PRESENCE ADD 1 alice");
        assert_eq!(bob.recv().await.unwrap(), "MUTE 1");
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let (_ctx, addr, tx) = start().await;
        let mut alice = Peer::register(addr, 40000, "alice").await;

        tx.send(true).unwrap();
        assert_eq!(alice.recv().await, None);
    }
}
