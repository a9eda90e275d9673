//! Client side of the control connection
//!
//! Registers with the relay, sends commands and turns server lines into a
//! stream of [`ServerMessage`] events. `HEARTBEAT` probes are consumed here
//! and never surface as events.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{Command, ServerMessage};
use crate::registry::frame::ClientId;
use crate::registry::names;

/// A control connection to the relay
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use voice_relay::client::ControlChannel;
///
/// # async fn example() -> voice_relay::error::Result<()> {
/// let addr = "127.0.0.1:4444".parse().unwrap();
/// let mut channel = ControlChannel::connect(addr, Duration::from_secs(5)).await?;
/// let (id, mut events) = channel
///     .register(40000, Some("alice"), Duration::from_secs(5))
///     .await?;
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {}", event);
///     }
/// });
///
/// println!("Registered as {}", id);
/// channel.mute().await?;
/// # Ok(())
/// # }
/// ```
pub struct ControlChannel {
    writer: OwnedWriteHalf,
    reader: Option<BufReader<OwnedReadHalf>>,
    client_id: Option<ClientId>,
    reader_task: Option<JoinHandle<()>>,
    event_buffer: usize,
}

impl ControlChannel {
    /// Connect to the relay's control port
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr)).await??;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            writer,
            reader: Some(BufReader::new(read_half)),
            client_id: None,
            reader_task: None,
            event_buffer: 256,
        })
    }

    /// Set the capacity of the event channel returned by [`register`](Self::register)
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Register with the relay
    ///
    /// Whitespace in `name` is replaced by `_`. Returns the assigned id and a
    /// receiver for subsequent server events (starting with the roster).
    pub async fn register(
        &mut self,
        udp_port: u16,
        name: Option<&str>,
        timeout: Duration,
    ) -> Result<(ClientId, mpsc::Receiver<ServerMessage>)> {
        let Some(mut reader) = self.reader.take() else {
            return Err(Error::Rejected("already registered".into()));
        };

        let name = names::sanitize(name, "");
        let command = Command::Register {
            udp_port,
            name: (!name.is_empty()).then_some(name),
        };
        self.send(&command).await?;

        let client_id = tokio::time::timeout(timeout, await_registration(&mut reader)).await??;
        self.client_id = Some(client_id);

        let (tx, rx) = mpsc::channel(self.event_buffer);
        self.reader_task = Some(tokio::spawn(read_events(reader, tx)));

        tracing::debug!(client_id = client_id, udp_port = udp_port, "Registered with relay");
        Ok((client_id, rx))
    }

    /// Id assigned at registration
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Send one command line
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let line = format!("{}\n", command);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn join(&mut self) -> Result<()> {
        self.send(&Command::Join).await
    }

    pub async fn leave(&mut self) -> Result<()> {
        self.send(&Command::Leave).await
    }

    pub async fn mute(&mut self) -> Result<()> {
        self.send(&Command::Mute).await
    }

    pub async fn unmute(&mut self) -> Result<()> {
        self.send(&Command::Unmute).await
    }

    /// Ask for the current roster
    pub async fn sync(&mut self) -> Result<()> {
        self.send(&Command::Sync).await
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Read lines until the registration reply
async fn await_registration(reader: &mut BufReader<OwnedReadHalf>) -> Result<ClientId> {
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::ConnectionClosed);
        }

        match ServerMessage::parse(&line)? {
            ServerMessage::Ok(id) => return Ok(id),
            ServerMessage::Error(reason) => return Err(Error::Rejected(reason)),
            other => {
                tracing::debug!(message = %other, "Ignoring line before registration reply");
            }
        }
    }
}

/// Forward parsed server lines until EOF or the receiver goes away
async fn read_events(mut reader: BufReader<OwnedReadHalf>, tx: mpsc::Sender<ServerMessage>) {
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Control read failed");
                break;
            }
        }

        if line.trim().is_empty() {
            continue;
        }

        match ServerMessage::parse(&line) {
            Ok(ServerMessage::Heartbeat) => {}
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable server line");
            }
        }
    }

    tracing::debug!("Control event reader stopped");
}
