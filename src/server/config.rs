//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP control listener address
    pub control_addr: SocketAddr,

    /// UDP media socket address
    pub media_addr: SocketAddr,

    /// Maximum concurrent control connections (0 = unlimited)
    pub max_connections: usize,

    /// Control read timeout (shutdown is observed within this interval)
    pub read_timeout: Duration,

    /// Bound on a single control line write
    pub write_timeout: Duration,

    /// Largest accepted audio payload
    pub max_payload: usize,

    /// UDP receive buffer size
    pub max_datagram: usize,

    /// Media worker tasks allowed to run at once
    pub worker_count: usize,

    /// How long shutdown waits for in-flight media work
    pub shutdown_grace: Duration,

    /// Enable TCP_NODELAY on control connections
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_CONTROL_PORT)),
            media_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_MEDIA_PORT)),
            max_connections: 0, // Unlimited
            read_timeout: Duration::from_millis(500),
            write_timeout: Duration::from_secs(2),
            max_payload: DEFAULT_MAX_PAYLOAD,
            max_datagram: MAX_DATAGRAM_SIZE,
            worker_count: default_worker_count(),
            shutdown_grace: Duration::from_secs(2),
            tcp_nodelay: true, // Control lines are tiny and latency-sensitive
        }
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl ServerConfig {
    /// Create a config bound to the given control and media addresses
    pub fn with_addrs(control_addr: SocketAddr, media_addr: SocketAddr) -> Self {
        Self {
            control_addr,
            media_addr,
            ..Default::default()
        }
    }

    /// Config for tests: loopback, OS-assigned ports
    pub fn loopback() -> Self {
        Self::with_addrs(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            SocketAddr::from(([127, 0, 0, 1], 0)),
        )
    }

    /// Set the control listener address
    pub fn control_addr(mut self, addr: SocketAddr) -> Self {
        self.control_addr = addr;
        self
    }

    /// Set the media socket address
    pub fn media_addr(mut self, addr: SocketAddr) -> Self {
        self.media_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the control read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the control write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload size
    pub fn max_payload(mut self, max: usize) -> Self {
        self.max_payload = max.min(u16::MAX as usize);
        self
    }

    /// Set the number of media workers (at least one)
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}
