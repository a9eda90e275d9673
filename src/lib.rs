//! Real-time audio relay
//!
//! Clients register over a line-oriented TCP control connection, then send
//! small audio frames over UDP. The relay reorders each sender's frames and
//! fans them out to every other participant that is still present.
//!
//! # Server
//!
//! ```no_run
//! use voice_relay::{RelayServer, ServerConfig};
//!
//! # async fn example() -> voice_relay::Result<()> {
//! let server = RelayServer::bind(ServerConfig::default()).await?;
//! server
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: datagram codec and control line grammar
//! - [`registry`]: per-client state shared by every server component
//! - [`media`]: reorder and jitter buffers
//! - [`server`]: control handler, forwarding pipeline, liveness monitor
//! - [`session`]: control connection state and the presence broadcast table
//! - [`stats`]: relay counters
//! - [`client`]: helpers for writing a participant

pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, ProtocolError, Result};
pub use protocol::{Command, ServerMessage};
pub use registry::{ClientId, ClientRegistry, ClientStatus, RegistryConfig, RegistryError};
pub use server::{RelayServer, ServerConfig};
pub use stats::{RelayStats, RelayStatsSnapshot};
