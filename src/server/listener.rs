//! Relay server listener
//!
//! Binds the control and media sockets, runs the TCP accept loop, the UDP
//! receive loop and the liveness monitor, and coordinates shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{watch, Semaphore};

use crate::error::Result;
use crate::registry::{ClientRegistry, RegistryConfig};
use crate::server::config::ServerConfig;
use crate::server::context::RelayContext;
use crate::server::control::ControlHandler;
use crate::server::forwarder::MediaForwarder;
use crate::server::monitor::LivenessMonitor;
use crate::stats::{RelayStats, RelayStatsSnapshot};

/// Audio relay server
pub struct RelayServer {
    ctx: RelayContext,
    listener: TcpListener,
    control_addr: SocketAddr,
    media_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RelayServer {
    /// Bind both sockets with the default registry configuration
    ///
    /// Bind failures are the only fatal errors the server reports.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        Self::bind_with_registry_config(config, RegistryConfig::default()).await
    }

    /// Bind both sockets with a custom registry configuration
    pub async fn bind_with_registry_config(
        config: ServerConfig,
        registry_config: RegistryConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.control_addr).await?;
        let media_socket = UdpSocket::bind(config.media_addr).await?;
        let control_addr = listener.local_addr()?;
        let media_addr = media_socket.local_addr()?;

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = RelayContext::new(
            Arc::new(config),
            Arc::new(ClientRegistry::with_config(registry_config)),
            Arc::new(media_socket),
            shutdown_rx,
        );

        tracing::info!(
            control = %control_addr,
            media = %media_addr,
            workers = ctx.config.worker_count,
            "Relay server bound"
        );

        Ok(Self {
            ctx,
            listener,
            control_addr,
            media_addr,
            shutdown_tx,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        })
    }

    /// Actual control listener address (resolves port 0)
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Actual media socket address (resolves port 0)
    pub fn media_addr(&self) -> SocketAddr {
        self.media_addr
    }

    /// Get a reference to the client registry
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.ctx.registry
    }

    /// Shared statistics counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.ctx.stats
    }

    /// Point-in-time statistics
    pub fn stats_snapshot(&self) -> RelayStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Run until the process is killed
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves, the accept and receive loops stop, control
    /// handlers observe the signal within one read timeout, and in-flight
    /// media work gets `shutdown_grace` to finish.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let workers = Arc::new(Semaphore::new(self.ctx.config.worker_count));

        let forwarder = MediaForwarder::new(self.ctx.clone());
        let media_workers = Arc::clone(&workers);
        let media_handle = tokio::spawn(async move { forwarder.run(media_workers).await });

        let monitor = LivenessMonitor::new(self.ctx.clone());
        let monitor_handle = tokio::spawn(async move { monitor.run().await });

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.accept_loop() => {}
        }

        let _ = self.shutdown_tx.send(true);

        let _ = media_handle.await;
        let _ = monitor_handle.await;

        // Every permit back means no worker is still forwarding
        let permits = self.ctx.config.worker_count as u32;
        let drained = tokio::time::timeout(self.ctx.config.shutdown_grace, workers.acquire_many(permits)).await;
        if drained.is_err() {
            tracing::warn!("Media workers still busy after shutdown grace period");
        }
        workers.close();

        let clients = self.ctx.registry.len().await;
        tracing::info!(
            clients = clients,
            "Relay server stopped"
        );

        Ok(())
    }

    /// Request shutdown from another task
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn accept_loop(&self) {
        loop {
            let accepted = tokio::select! {
                _ = self.ctx.shutdown_signal() => return,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New control connection"
        );

        if self.ctx.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let _permit = permit;
            ctx.stats.connection_opened();

            let handler = ControlHandler::new(ctx.clone(), session_id, socket, peer_addr);
            if let Err(e) = handler.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Control connection error"
                );
            }

            ctx.stats.connection_closed();
        });
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("control_addr", &self.control_addr)
            .field("media_addr", &self.media_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::protocol::datagram;
    use crate::registry::ClientStatus;

    struct Running {
        server: Arc<RelayServer>,
        stop: Option<oneshot::Sender<()>>,
        handle: JoinHandle<Result<()>>,
    }

    impl Running {
        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            tokio::time::timeout(Duration::from_secs(5), self.handle)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
    }

    async fn start(config: ServerConfig) -> Running {
        let server = Arc::new(RelayServer::bind(config).await.unwrap());
        let (stop, stopped) = oneshot::channel::<()>();

        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            running
                .run_until(async {
                    let _ = stopped.await;
                })
                .await
        });

        Running {
            server,
            stop: Some(stop),
            handle,
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig::loopback()
            .read_timeout(Duration::from_millis(50))
            .worker_count(4)
    }

    /// A client with a control connection and a media socket
    struct TestClient {
        id: u32,
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        media: UdpSocket,
        relay_media: SocketAddr,
        next_seq: u32,
    }

    impl TestClient {
        async fn join(server: &RelayServer, name: &str) -> Self {
            let media = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = media.local_addr().unwrap().port();
            let (read_half, writer) = TcpStream::connect(server.control_addr())
                .await
                .unwrap()
                .into_split();

            let mut client = Self {
                id: 0,
                reader: BufReader::new(read_half),
                writer,
                media,
                relay_media: server.media_addr(),
                next_seq: 0,
            };

            client.send(&format!("REGISTER {} {}", port, name)).await;
            let reply = client.recv().await.unwrap();
            client.id = reply
                .strip_prefix("OK ")
                .and_then(|id| id.parse().ok())
                .expect("registration failed");
            client
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            let mut line = String::new();
            let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a control line")
                .unwrap();
            (n > 0).then(|| line.trim_end().to_string())
        }

        async fn expect(&mut self, line: &str) {
            assert_eq!(self.recv().await.as_deref(), Some(line));
        }

        async fn send_frame(&self, seq: u32) {
            let bytes = datagram::encode_parts(self.id, seq, &[seq as u8; 8]);
            self.media.send_to(&bytes, self.relay_media).await.unwrap();
        }

        async fn send_next(&mut self) -> u32 {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.send_frame(seq).await;
            seq
        }

        /// Next forwarded frame as (sender, sequence)
        async fn recv_frame(&self) -> Option<(u32, u32)> {
            let mut buf = [0u8; 1500];
            let (len, _) =
                tokio::time::timeout(Duration::from_millis(300), self.media.recv_from(&mut buf))
                    .await
                    .ok()?
                    .ok()?;
            let frame = datagram::decode(Bytes::copy_from_slice(&buf[..len]), 320).ok()?;
            Some((frame.sender_id, frame.sequence))
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_run_until_is_send() {
        let server = RelayServer::bind(test_config()).await.unwrap();
        assert_send(&server.run_until(std::future::pending::<()>()));
    }

    #[tokio::test]
    async fn test_bind_resolves_ports() {
        let running = start(test_config()).await;

        assert_ne!(running.server.control_addr().port(), 0);
        assert_ne!(running.server.media_addr().port(), 0);

        running.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = test_config().control_addr(taken.local_addr().unwrap());

        assert!(RelayServer::bind(config).await.is_err());
    }

    #[tokio::test]
    async fn test_frames_delivered_in_sequence_order() {
        let running = start(test_config()).await;
        let a = TestClient::join(&running.server, "alice").await;
        let mut b = TestClient::join(&running.server, "bob").await;
        b.expect(&format!("PRESENCE ADD {} alice", a.id)).await;

        a.send_frame(1).await;
        a.send_frame(0).await;
        a.send_frame(2).await;

        assert_eq!(b.recv_frame().await, Some((a.id, 0)));
        assert_eq!(b.recv_frame().await, Some((a.id, 1)));
        assert_eq!(b.recv_frame().await, Some((a.id, 2)));
        assert_eq!(a.recv_frame().await, None);

        running.stop().await;
    }

    #[tokio::test]
    async fn test_mute_suppresses_outbound_only() {
        let running = start(test_config()).await;
        let mut a = TestClient::join(&running.server, "alice").await;
        let mut b = TestClient::join(&running.server, "bob").await;
        b.expect(&format!("PRESENCE ADD {} alice", a.id)).await;
        a.expect(&format!("PRESENCE ADD {} bob", b.id)).await;

        a.send("MUTE").await;
        b.expect(&format!("MUTE {}", a.id)).await;

        a.send_next().await;
        assert_eq!(b.recv_frame().await, None);

        // Muted listeners still hear others
        let seq = b.send_next().await;
        assert_eq!(a.recv_frame().await, Some((b.id, seq)));

        a.send("UNMUTE").await;
        b.expect(&format!("UNMUTE {}", a.id)).await;

        let seq = a.send_next().await;
        assert_eq!(b.recv_frame().await, Some((a.id, seq)));

        running.stop().await;
    }

    #[tokio::test]
    async fn test_reregistration_reuses_id() {
        let running = start(test_config()).await;
        let media = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = media.local_addr().unwrap().port();

        let mut ids = Vec::new();
        let mut connections = Vec::new();
        for _ in 0..2 {
            let stream = TcpStream::connect(running.server.control_addr()).await.unwrap();
            let (read_half, mut writer) = stream.into_split();
            writer
                .write_all(format!("REGISTER {} carol\n", port).as_bytes())
                .await
                .unwrap();

            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            ids.push(line.trim_end().to_string());
            connections.push((reader, writer));
        }

        assert_eq!(ids[0], ids[1]);
        assert_eq!(running.server.registry().len().await, 1);

        running.stop().await;
    }

    #[tokio::test]
    async fn test_presence_add_and_remove_are_paired() {
        let running = start(test_config()).await;
        let mut a = TestClient::join(&running.server, "alice").await;
        let mut b = TestClient::join(&running.server, "bob").await;
        a.expect(&format!("PRESENCE ADD {} bob", b.id)).await;

        b.send("LEAVE").await;
        a.expect(&format!("PRESENCE REMOVE {}", b.id)).await;
        b.send("JOIN").await;
        a.expect(&format!("PRESENCE ADD {} bob", b.id)).await;

        let b_id = b.id;
        drop(b);
        a.expect(&format!("PRESENCE REMOVE {}", b_id)).await;

        // Nothing further about bob; the next line is about carol
        let c = TestClient::join(&running.server, "carol").await;
        a.expect(&format!("PRESENCE ADD {} carol", c.id)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            running.server.registry().get(b_id).await.unwrap().status().await,
            ClientStatus::Disconnected
        );

        running.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_names_disambiguated() {
        let running = start(test_config()).await;

        let mut a = TestClient::join(&running.server, "Guest").await;
        let b = TestClient::join(&running.server, "guest").await;
        a.expect(&format!("PRESENCE ADD {} guest#1", b.id)).await;

        running.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_registration_closes_connection() {
        let running = start(test_config()).await;
        let stream = TcpStream::connect(running.server.control_addr()).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        writer.write_all(b"HELLO\n").await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("ERROR "));

        line.clear();
        assert_eq!(reader.read_line(&mut line).await.unwrap(), 0);
        assert!(running.server.registry().is_empty().await);

        running.stop().await;
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let running = start(test_config().max_connections(1)).await;

        let _first = TestClient::join(&running.server, "alice").await;

        // Second connection is accepted by the OS, then dropped by the server
        let mut stream = TcpStream::connect(running.server.control_addr()).await.unwrap();
        stream.write_all(b"REGISTER 40000 bob\n").await.unwrap();
        let (read_half, _writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        running.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_control_connections() {
        let running = start(test_config()).await;
        let mut a = TestClient::join(&running.server, "alice").await;

        let server = Arc::clone(&running.server);
        running.stop().await;

        assert_eq!(a.recv().await, None);
        assert!(server.stats_snapshot().registrations >= 1);
    }
}
