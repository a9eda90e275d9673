//! Registry configuration

use std::time::Duration;

use crate::protocol::constants::{DEFAULT_USERNAME, REORDER_CAPACITY};

/// Configuration for the client registry and its liveness sweep
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Frames held per sender while waiting for gaps to fill
    pub reorder_capacity: usize,

    /// Silence after which an active or muted client is marked disconnected
    pub media_timeout: Duration,

    /// Multiple of `media_timeout` after which a disconnected client is purged
    pub removal_factor: u32,

    /// How often the liveness monitor runs
    pub sweep_interval: Duration,

    /// Send HEARTBEAT probes to control connections on each sweep
    pub probe_enabled: bool,

    /// Name used when a registration carries none
    pub default_name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reorder_capacity: REORDER_CAPACITY,
            media_timeout: Duration::from_secs(30),
            removal_factor: 5,
            sweep_interval: Duration::from_secs(5),
            probe_enabled: true,
            default_name: DEFAULT_USERNAME.to_string(),
        }
    }
}

impl RegistryConfig {
    /// Set the reorder buffer capacity
    pub fn reorder_capacity(mut self, capacity: usize) -> Self {
        self.reorder_capacity = capacity.max(1);
        self
    }

    /// Set the media silence timeout
    pub fn media_timeout(mut self, timeout: Duration) -> Self {
        self.media_timeout = timeout;
        self
    }

    /// Set the removal grace multiple
    pub fn removal_factor(mut self, factor: u32) -> Self {
        self.removal_factor = factor.max(1);
        self
    }

    /// Set the liveness sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Disable control-connection probing
    pub fn disable_probe(mut self) -> Self {
        self.probe_enabled = false;
        self
    }

    /// Set the default registration name
    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    /// Time after which a disconnected record is purged
    pub fn removal_after(&self) -> Duration {
        self.media_timeout * self.removal_factor
    }
}
