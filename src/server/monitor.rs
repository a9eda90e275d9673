//! Liveness monitor
//!
//! Runs every `sweep_interval`:
//!
//! - media timeout: silent `Active`/`Muted` clients become `Disconnected`
//! - extended removal: long-disconnected clients are purged along with any
//!   control connection still mapped to them
//! - probe: a `HEARTBEAT` line goes to every control connection, and a failed
//!   write disconnects its client immediately
//!
//! Every action is an idempotent state transition, nothing is retried.

use std::time::Instant;

use crate::protocol::ServerMessage;
use crate::registry::SweepReport;
use crate::server::context::RelayContext;

/// Periodic liveness checks
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    ctx: RelayContext,
}

impl LivenessMonitor {
    pub fn new(ctx: RelayContext) -> Self {
        Self { ctx }
    }

    /// Run until shutdown
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.ctx.registry.config().sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.ctx.shutdown_signal() => break,
                _ = interval.tick() => {
                    self.sweep(Instant::now()).await;
                    if self.ctx.registry.config().probe_enabled {
                        self.probe().await;
                    }
                }
            }
        }

        tracing::debug!("Liveness monitor stopped");
    }

    /// Apply the media timeout and removal grace as of `now`
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let _presence = self.ctx.connections.presence().await;
        let report = self.ctx.registry.sweep(now).await;

        for (client_id, previous) in &report.timed_out {
            if previous.is_present() {
                self.ctx
                    .connections
                    .broadcast(&ServerMessage::PresenceRemove(*client_id), Some(*client_id))
                    .await;
            }
        }

        for client_id in &report.removed {
            for connection in self.ctx.connections.remove_client(*client_id).await {
                tracing::debug!(
                    client_id = *client_id,
                    session_id = connection.session_id(),
                    "Dropping control connection of removed client"
                );
                connection.shutdown().await;
            }
        }

        if !report.timed_out.is_empty() || !report.removed.is_empty() {
            let clients = self.ctx.registry.len().await;
            tracing::info!(
                timed_out = report.timed_out.len(),
                removed = report.removed.len(),
                clients = clients,
                "Liveness sweep"
            );
        }

        report
    }

    /// Probe every control connection; returns how many failed
    pub async fn probe(&self) -> usize {
        let failed = self.ctx.connections.probe(&ServerMessage::Heartbeat).await;
        let count = failed.len();

        for (connection, error) in failed {
            self.ctx.connections.remove(connection.session_id()).await;

            let Some(owner) = connection.owner() else {
                continue;
            };

            tracing::warn!(
                client_id = owner.client_id,
                session_id = connection.session_id(),
                peer = %connection.peer_addr(),
                error = %error,
                "Control probe failed"
            );

            if let Err(e) = self
                .ctx
                .disconnect_client(owner.client_id, owner.generation)
                .await
            {
                tracing::debug!(client_id = owner.client_id, error = %e, "Skipping disconnect");
            }
        }

        count
    }
}
