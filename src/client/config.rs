//! Client configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;

/// Options for connecting a client to a relay
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay control address (TCP)
    pub control_addr: SocketAddr,

    /// Relay media address (UDP)
    pub media_addr: SocketAddr,

    /// Local address for the media socket
    pub local_media_addr: SocketAddr,

    /// Requested display name
    pub name: Option<String>,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// How long to wait for the registration reply
    pub register_timeout: Duration,

    /// Keepalive cadence while muted
    pub keepalive_interval: Duration,

    /// Largest payload the receiver accepts
    pub max_payload: usize,

    /// Per-sender jitter buffer capacity
    pub jitter_capacity: usize,

    /// Frames queued before playback starts
    pub jitter_threshold: usize,

    /// Playback cadence
    pub frame_duration: Duration,

    /// Capacity of the server event channel
    pub event_buffer: usize,
}

impl ClientConfig {
    /// Config for a relay reachable at the given addresses
    pub fn new(control_addr: SocketAddr, media_addr: SocketAddr) -> Self {
        Self {
            control_addr,
            media_addr,
            local_media_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            name: None,
            connect_timeout: Duration::from_secs(5),
            register_timeout: Duration::from_secs(5),
            keepalive_interval: KEEPALIVE_INTERVAL,
            max_payload: DEFAULT_MAX_PAYLOAD,
            jitter_capacity: JITTER_CAPACITY,
            jitter_threshold: JITTER_THRESHOLD,
            frame_duration: FRAME_DURATION,
            event_buffer: 256,
        }
    }

    /// Set the requested display name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind the media socket to a specific local address
    pub fn local_media_addr(mut self, addr: SocketAddr) -> Self {
        self.local_media_addr = addr;
        self
    }

    /// Set the registration timeout
    pub fn register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    /// Set the muted keepalive interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set jitter buffer limits
    pub fn jitter(mut self, capacity: usize, threshold: usize) -> Self {
        self.jitter_capacity = capacity;
        self.jitter_threshold = threshold;
        self
    }
}
