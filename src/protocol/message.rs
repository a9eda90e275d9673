//! Server-to-client control messages

use std::fmt;

use crate::error::ProtocolError;
use crate::registry::frame::ClientId;

/// A line sent from the server on a control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `OK <assignedId>`
    Ok(ClientId),
    /// `ERROR <message>`
    Error(String),
    /// `PRESENCE ADD <id> <name>`
    PresenceAdd { id: ClientId, name: String },
    /// `PRESENCE REMOVE <id>`
    PresenceRemove(ClientId),
    /// `MUTE <id>`
    Mute(ClientId),
    /// `UNMUTE <id>`
    Unmute(ClientId),
    /// `HEARTBEAT` liveness probe
    Heartbeat,
}

impl ServerMessage {
    /// Parse a server line (used by the client side)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let invalid = || ProtocolError::InvalidMessage(line.to_string());
        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().filter(|v| !v.is_empty()).ok_or(ProtocolError::EmptyLine)?;
        let rest = parts.next().unwrap_or("").trim();

        let parse_id = |s: &str| s.parse::<ClientId>().map_err(|_| invalid());

        match verb {
            "OK" => Ok(ServerMessage::Ok(parse_id(rest)?)),
            "ERROR" => Ok(ServerMessage::Error(rest.to_string())),
            "HEARTBEAT" => Ok(ServerMessage::Heartbeat),
            "MUTE" => Ok(ServerMessage::Mute(parse_id(rest)?)),
            "UNMUTE" => Ok(ServerMessage::Unmute(parse_id(rest)?)),
            "PRESENCE" => {
                let mut args = rest.split_whitespace();
                match (args.next(), args.next(), args.next()) {
                    (Some("ADD"), Some(id), Some(name)) => Ok(ServerMessage::PresenceAdd {
                        id: parse_id(id)?,
                        name: name.to_string(),
                    }),
                    (Some("REMOVE"), Some(id), None) => {
                        Ok(ServerMessage::PresenceRemove(parse_id(id)?))
                    }
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Ok(id) => write!(f, "OK {}", id),
            ServerMessage::Error(msg) => write!(f, "ERROR {}", msg),
            ServerMessage::PresenceAdd { id, name } => write!(f, "PRESENCE ADD {} {}", id, name),
            ServerMessage::PresenceRemove(id) => write!(f, "PRESENCE REMOVE {}", id),
            ServerMessage::Mute(id) => write!(f, "MUTE {}", id),
            ServerMessage::Unmute(id) => write!(f, "UNMUTE {}", id),
            ServerMessage::Heartbeat => f.write_str("HEARTBEAT"),
        }
    }
}
