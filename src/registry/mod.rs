//! Client registry
//!
//! The registry owns one [`ClientRecord`] per participant and is the only
//! state shared between the control handlers, the media pipeline and the
//! liveness monitor.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<ClientRegistry>
//!                  ┌───────────────────────────────┐
//!                  │ clients: RwLock<HashMap<Id,   │
//!                  │   Arc<ClientEntry {           │
//!                  │     record: Mutex<Record>,    │
//!                  │     forwarding: Mutex<()>,    │
//!                  │   }>                          │
//!                  │ >>                            │
//!                  └───────────────┬───────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!  [Control handler]        [Media pipeline]        [Liveness monitor]
//!  register / transition    reorder + fan-out       sweep / probe
//! ```
//!
//! Components hold `Arc<ClientEntry>` handles and lock the record they need;
//! records are never copied out and modified elsewhere.

pub mod config;
pub mod entry;
pub mod error;
pub mod frame;
pub mod names;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ClientEntry, ClientRecord, ClientStatus};
pub use error::RegistryError;
pub use frame::{AudioFrame, ClientId};
pub use store::{ClientRegistry, Registration, RosterEntry, SweepReport};
