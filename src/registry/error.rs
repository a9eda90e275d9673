//! Registry error types

use super::entry::ClientStatus;
use super::frame::ClientId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No record with this id
    UnknownClient(ClientId),
    /// Status change not permitted by the transition table
    InvalidTransition { from: ClientStatus, to: ClientStatus },
    /// The record was re-registered by a newer connection
    Superseded(ClientId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownClient(id) => write!(f, "Client not registered: {}", id),
            RegistryError::InvalidTransition { from, to } => {
                write!(f, "Cannot change status from {} to {}", from, to)
            }
            RegistryError::Superseded(id) => {
                write!(f, "Client {} was re-registered by another connection", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
