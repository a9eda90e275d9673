//! Client registry implementation
//!
//! The single source of truth for participant state. Control handlers, the
//! media pipeline and the liveness monitor all read and mutate records
//! through here.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use super::config::RegistryConfig;
use super::entry::{ClientEntry, ClientRecord, ClientStatus};
use super::error::RegistryError;
use super::frame::ClientId;
use super::names;

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Assigned (or reused) id
    pub id: ClientId,
    /// Name after disambiguation
    pub name: String,
    /// Generation of the record this registration owns
    pub generation: u64,
    /// Status the record had before a reuse, `None` for a fresh record
    pub previous: Option<ClientStatus>,
}

impl Registration {
    /// Whether an existing record was reused
    pub fn reused(&self) -> bool {
        self.previous.is_some()
    }
}

/// One line of the participant roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: ClientId,
    pub name: String,
    pub status: ClientStatus,
}

/// Result of one liveness sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Clients moved to `Disconnected` for media silence, with the status they left
    pub timed_out: Vec<(ClientId, ClientStatus)>,
    /// Clients purged after the extended grace period
    pub removed: Vec<ClientId>,
}

/// Central registry of all clients
///
/// The map lock is only held to find, insert or remove entries. Each record
/// has its own lock, so work on one client never blocks another. A record
/// lock is never held while waiting for the map lock.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<ClientEntry>>>,
    // Serializes registrations so name disambiguation sees earlier results
    registering: Mutex<()>,
    next_id: AtomicU32,
    config: RegistryConfig,
}

impl ClientRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            registering: Mutex::new(()),
            next_id: AtomicU32::new(1),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a client reachable at `addr:udp_port`
    ///
    /// Reuses the id of any record declared from the same address and port,
    /// otherwise allocates a new one. Either way the record ends up `Active`
    /// with fresh sequence state and a name unique among present clients.
    pub async fn register(
        &self,
        addr: IpAddr,
        udp_port: u16,
        requested_name: Option<&str>,
    ) -> Registration {
        let declared = SocketAddr::new(addr, udp_port);
        let requested = names::sanitize(requested_name, &self.config.default_name);

        // Held for the whole registration so concurrent requests for the same
        // name are disambiguated one after another. The map itself is only
        // locked to snapshot and to insert.
        let _registering = self.registering.lock().await;

        let mut existing = None;
        let mut taken = Vec::new();
        for entry in self.snapshot().await {
            let record = entry.lock().await;
            if record.registered_addr == declared {
                existing = Some(Arc::clone(&entry));
            } else if record.status().is_present() {
                taken.push(record.name.clone());
            }
        }

        let name = names::disambiguate(&requested, taken.iter().map(String::as_str));

        if let Some(entry) = existing {
            let registration = {
                let mut record = entry.lock().await;
                let previous = record.status();
                record.reregister(name.clone());

                tracing::info!(
                    client_id = record.id,
                    name = %record.name,
                    endpoint = %declared,
                    previous = %previous,
                    generation = record.generation,
                    "Client re-registered"
                );

                Registration {
                    id: record.id,
                    name,
                    generation: record.generation,
                    previous: Some(previous),
                }
            };

            // A sweep may have purged the record after the snapshot. Now that
            // it is active again it stays until a later disconnect.
            self.clients
                .write()
                .await
                .entry(registration.id)
                .or_insert_with(|| Arc::clone(&entry));

            return registration;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = ClientRecord::new(id, name.clone(), declared, self.config.reorder_capacity);
        let clients = {
            let mut clients = self.clients.write().await;
            clients.insert(id, Arc::new(ClientEntry::new(record)));
            clients.len()
        };

        tracing::info!(
            client_id = id,
            name = %name,
            endpoint = %declared,
            clients = clients,
            "Client registered"
        );

        Registration {
            id,
            name,
            generation: 0,
            previous: None,
        }
    }

    /// Look up a client
    pub async fn get(&self, id: ClientId) -> Option<Arc<ClientEntry>> {
        self.clients.read().await.get(&id).cloned()
    }

    /// Handles to every entry at this moment
    pub async fn snapshot(&self) -> Vec<Arc<ClientEntry>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Visit every record, one lock at a time
    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&ClientRecord),
    {
        for entry in self.snapshot().await {
            let record = entry.lock().await;
            visitor(&record);
        }
    }

    /// Remove a client outright
    pub async fn remove(&self, id: ClientId) -> Option<Arc<ClientEntry>> {
        let removed = self.clients.write().await.remove(&id);
        if removed.is_some() {
            tracing::debug!(client_id = id, "Client removed");
        }
        removed
    }

    /// Number of records, in any status
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Present (`Active`/`Muted`) participants, ordered by id
    pub async fn roster(&self, exclude: Option<ClientId>) -> Vec<RosterEntry> {
        let mut roster = Vec::new();

        for entry in self.snapshot().await {
            if Some(entry.id()) == exclude {
                continue;
            }
            let record = entry.lock().await;
            if record.status().is_present() {
                roster.push(RosterEntry {
                    id: record.id,
                    name: record.name.clone(),
                    status: record.status(),
                });
            }
        }

        roster.sort_by_key(|e| e.id);
        roster
    }

    /// Mark a client disconnected on behalf of the connection that owns `generation`
    ///
    /// Returns the previous status if this call changed it, `None` if the
    /// record was already disconnected.
    pub async fn disconnect(
        &self,
        id: ClientId,
        generation: u64,
    ) -> Result<Option<ClientStatus>, RegistryError> {
        let entry = self
            .get(id)
            .await
            .ok_or(RegistryError::UnknownClient(id))?;
        let mut record = entry.lock().await;

        if record.generation != generation {
            return Err(RegistryError::Superseded(id));
        }

        Ok(record.mark_disconnected())
    }

    /// Run one liveness sweep as of `now`
    ///
    /// - present clients silent for longer than the media timeout become
    ///   `Disconnected`
    /// - `Disconnected` clients past the removal grace period are purged
    ///
    /// Records locked by someone else are skipped until the next sweep.
    pub async fn sweep(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let timeout = self.config.media_timeout;
        let grace = self.config.removal_after();

        for entry in self.snapshot().await {
            let mut record = entry.lock().await;
            if record.status().is_present() && record.is_silent(now, timeout) {
                if let Some(previous) = record.mark_disconnected() {
                    tracing::info!(
                        client_id = record.id,
                        silent_secs = now.saturating_duration_since(record.last_heard).as_secs(),
                        "Client timed out"
                    );
                    report.timed_out.push((record.id, previous));
                }
            }
        }

        let mut clients = self.clients.write().await;
        clients.retain(|id, entry| {
            let expired = entry
                .try_lock()
                .map(|record| record.is_expired(now, grace))
                .unwrap_or(false);

            if expired {
                tracing::info!(client_id = *id, "Client removed after grace period");
                report.removed.push(*id);
            }
            !expired
        });

        report
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_register_allocates_increasing_ids() {
        let registry = ClientRegistry::new();

        let a = registry.register(LOCALHOST, 40000, Some("alice")).await;
        let b = registry.register(LOCALHOST, 40001, Some("bob")).await;

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(!a.reused());
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_reregistration_reuses_id() {
        let registry = ClientRegistry::new();

        let first = registry.register(LOCALHOST, 40000, Some("alice")).await;
        let entry = registry.get(first.id).await.unwrap();
        {
            let mut record = entry.lock().await;
            record.reorder.skip_to(25);
            record.mark_disconnected();
        }

        let second = registry.register(LOCALHOST, 40000, Some("alice")).await;

        assert_eq!(second.id, first.id);
        assert_eq!(second.previous, Some(ClientStatus::Disconnected));
        assert_eq!(second.generation, first.generation + 1);
        assert_eq!(second.name, "alice"); // own old name does not collide

        let record = entry.lock().await;
        assert_eq!(record.status(), ClientStatus::Active);
        assert_eq!(record.reorder.expected(), 0);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_different_port_gets_new_id() {
        let registry = ClientRegistry::new();

        let a = registry.register(LOCALHOST, 40000, None).await;
        let b = registry.register(LOCALHOST, 40002, None).await;

        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "Guest");
        assert_eq!(b.name, "Guest#1");
    }

    #[tokio::test]
    async fn test_concurrent_same_name_registrations() {
        let registry = Arc::new(ClientRegistry::new());

        let handles: Vec<_> = (0..3u16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.register(LOCALHOST, 41000 + i, Some("Guest")).await
                })
            })
            .collect();

        let mut names = Vec::new();
        for handle in handles {
            names.push(handle.await.unwrap().name);
        }
        names.sort();

        assert_eq!(names, vec!["Guest", "Guest#1", "Guest#2"]);
    }

    #[tokio::test]
    async fn test_register_does_not_block_lookups() {
        let registry = Arc::new(ClientRegistry::new());
        let alice = registry.register(LOCALHOST, 40000, Some("alice")).await;
        let entry = registry.get(alice.id).await.unwrap();

        // Registration has to wait for this record while scanning names
        let held = entry.lock().await;
        let pending = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.register(LOCALHOST, 40001, Some("bob")).await })
        };
        tokio::task::yield_now().await;

        let lookup = tokio::time::timeout(Duration::from_millis(200), registry.get(alice.id))
            .await
            .unwrap();
        assert!(lookup.is_some());
        assert_eq!(registry.len().await, 1);
        assert!(!pending.is_finished());

        drop(held);
        let bob = pending.await.unwrap();
        assert_eq!(bob.name, "bob");
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_left_clients_release_their_name() {
        let registry = ClientRegistry::new();

        let a = registry.register(LOCALHOST, 40000, Some("alice")).await;
        registry
            .get(a.id)
            .await
            .unwrap()
            .transition(ClientStatus::Left)
            .await
            .unwrap();

        let b = registry.register(LOCALHOST, 40001, Some("alice")).await;
        assert_eq!(b.name, "alice");
    }

    #[tokio::test]
    async fn test_roster_only_lists_present_clients() {
        let registry = ClientRegistry::new();

        let a = registry.register(LOCALHOST, 40000, Some("a")).await;
        let b = registry.register(LOCALHOST, 40001, Some("b")).await;
        let c = registry.register(LOCALHOST, 40002, Some("c")).await;

        let entry_b = registry.get(b.id).await.unwrap();
        entry_b.transition(ClientStatus::Muted).await.unwrap();
        let entry_c = registry.get(c.id).await.unwrap();
        entry_c.transition(ClientStatus::Left).await.unwrap();

        let roster = registry.roster(Some(a.id)).await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, b.id);
        assert_eq!(roster[0].status, ClientStatus::Muted);

        let mut names = Vec::new();
        registry.for_each(|record| names.push(record.name.clone())).await;
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_disconnect_respects_generation() {
        let registry = ClientRegistry::new();

        let first = registry.register(LOCALHOST, 40000, None).await;
        let second = registry.register(LOCALHOST, 40000, None).await;

        // The older connection's cleanup must not clobber the new registration
        assert_eq!(
            registry.disconnect(first.id, first.generation).await,
            Err(RegistryError::Superseded(first.id))
        );
        assert_eq!(
            registry.disconnect(second.id, second.generation).await,
            Ok(Some(ClientStatus::Active))
        );
        assert_eq!(registry.disconnect(second.id, second.generation).await, Ok(None));
        assert_eq!(
            registry.disconnect(99, 0).await,
            Err(RegistryError::UnknownClient(99))
        );
    }

    #[tokio::test]
    async fn test_sweep_times_out_then_removes() {
        let config = RegistryConfig::default()
            .media_timeout(Duration::from_secs(10))
            .removal_factor(5);
        let registry = ClientRegistry::with_config(config);

        let a = registry.register(LOCALHOST, 40000, None).await;
        let b = registry.register(LOCALHOST, 40001, None).await;
        registry
            .get(b.id)
            .await
            .unwrap()
            .transition(ClientStatus::Muted)
            .await
            .unwrap();

        let now = Instant::now();

        // Nothing is silent yet
        assert_eq!(registry.sweep(now).await, SweepReport::default());

        let report = registry.sweep(now + Duration::from_secs(11)).await;
        let mut timed_out = report.timed_out.clone();
        timed_out.sort_by_key(|(id, _)| *id);
        assert_eq!(
            timed_out,
            vec![(a.id, ClientStatus::Active), (b.id, ClientStatus::Muted)]
        );
        assert!(report.removed.is_empty());
        assert_eq!(
            registry.get(a.id).await.unwrap().status().await,
            ClientStatus::Disconnected
        );

        // A second sweep does not report them again
        let report = registry.sweep(now + Duration::from_secs(12)).await;
        assert!(report.timed_out.is_empty());

        let report = registry.sweep(now + Duration::from_secs(200)).await;
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, vec![a.id, b.id]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_left_clients_are_not_timed_out() {
        let config = RegistryConfig::default().media_timeout(Duration::from_secs(1));
        let registry = ClientRegistry::with_config(config);

        let a = registry.register(LOCALHOST, 40000, None).await;
        registry
            .get(a.id)
            .await
            .unwrap()
            .transition(ClientStatus::Left)
            .await
            .unwrap();

        let report = registry.sweep(Instant::now() + Duration::from_secs(600)).await;
        assert!(report.timed_out.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(registry.len().await, 1);
    }
}
