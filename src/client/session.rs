//! Connected voice client
//!
//! Bundles the control channel with both media halves over one UDP socket.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::ServerMessage;
use crate::registry::frame::ClientId;

use super::config::ClientConfig;
use super::control::ControlChannel;
use super::media::{MediaReceiver, MediaSender};

/// A registered participant
///
/// # Example
/// ```no_run
/// use voice_relay::client::{ClientConfig, VoiceClient};
///
/// # async fn example() -> voice_relay::error::Result<()> {
/// let config = ClientConfig::new(
///     "127.0.0.1:4444".parse().unwrap(),
///     "127.0.0.1:5555".parse().unwrap(),
/// )
/// .name("alice");
/// let (mut client, mut events) = VoiceClient::connect(&config).await?;
///
/// client.sender.send(&[0u8; 320]).await?;
/// client.mute().await?;
///
/// while let Some(event) = events.recv().await {
///     client.apply_event(&event);
///     println!("Event: {}", event);
/// }
/// # Ok(())
/// # }
/// ```
pub struct VoiceClient {
    pub control: ControlChannel,
    pub sender: MediaSender,
    pub receiver: MediaReceiver,
}

impl VoiceClient {
    /// Bind the media socket, register, and punch the relay's media port
    ///
    /// Returns the client and a receiver for server events.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, mpsc::Receiver<ServerMessage>)> {
        let socket = Arc::new(UdpSocket::bind(config.local_media_addr).await?);
        let udp_port = socket.local_addr()?.port();

        let mut control = ControlChannel::connect(config.control_addr, config.connect_timeout)
            .await?
            .with_event_buffer(config.event_buffer);
        let (client_id, events) = control
            .register(udp_port, config.name.as_deref(), config.register_timeout)
            .await?;

        let mut sender = MediaSender::new(
            Arc::clone(&socket),
            config.media_addr,
            client_id,
            config.keepalive_interval,
        );
        sender.send_keepalive().await?;

        let receiver = MediaReceiver::new(
            socket,
            config.max_payload,
            config.jitter_capacity,
            config.jitter_threshold,
        );

        tracing::info!(
            client_id = client_id,
            relay = %config.control_addr,
            udp_port = udp_port,
            "Connected to relay"
        );

        Ok((
            Self {
                control,
                sender,
                receiver,
            },
            events,
        ))
    }

    pub fn id(&self) -> ClientId {
        self.sender.client_id()
    }

    /// Feed a server event to the playback side
    ///
    /// Call for every event received so presence changes reset the affected
    /// sender's jitter buffer.
    pub fn apply_event(&mut self, event: &ServerMessage) -> bool {
        self.receiver.apply_event(event)
    }

    /// Mute: tell the relay and stop sending audio
    pub async fn mute(&mut self) -> Result<()> {
        self.sender.set_muted(true);
        self.control.mute().await
    }

    /// Unmute: tell the relay and resume sending audio
    pub async fn unmute(&mut self) -> Result<()> {
        self.control.unmute().await?;
        self.sender.set_muted(false);
        Ok(())
    }

    /// Split into independently owned parts
    pub fn into_parts(self) -> (ControlChannel, MediaSender, MediaReceiver) {
        (self.control, self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::server::{RelayServer, ServerConfig};

    async fn next_event(events: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_clients_exchange_audio_through_relay() {
        let server = Arc::new(RelayServer::bind(ServerConfig::loopback()).await.unwrap());
        let running = Arc::clone(&server);
        let handle = tokio::spawn(async move { running.run().await });

        let config = |name: &str| {
            ClientConfig::new(server.control_addr(), server.media_addr())
                .local_media_addr("127.0.0.1:0".parse().unwrap())
                .name(name)
                .jitter(200, 1)
        };

        let (mut alice, mut alice_events) = VoiceClient::connect(&config("alice")).await.unwrap();
        let (mut bob, mut bob_events) = VoiceClient::connect(&config("bob")).await.unwrap();

        assert_eq!(
            next_event(&mut alice_events).await,
            ServerMessage::PresenceAdd {
                id: bob.id(),
                name: "bob".into()
            }
        );
        assert_eq!(
            next_event(&mut bob_events).await,
            ServerMessage::PresenceAdd {
                id: alice.id(),
                name: "alice".into()
            }
        );

        assert!(alice.sender.send(b"hello").await.unwrap());
        let sender = tokio::time::timeout(Duration::from_secs(2), bob.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender, Some(alice.id()));
        assert_eq!(
            bob.receiver.pop_ready(),
            vec![(alice.id(), Bytes::from_static(b"hello"))]
        );

        alice.mute().await.unwrap();
        assert_eq!(next_event(&mut bob_events).await, ServerMessage::Mute(alice.id()));
        assert!(!alice.sender.send(b"silenced").await.unwrap());

        server.shutdown();
        handle.await.unwrap().unwrap();
    }
}
