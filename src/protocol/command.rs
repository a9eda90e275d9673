//! Client-to-server control commands
//!
//! Each newline-delimited line from a control connection is parsed once into
//! a [`Command`]; the handler matches on the variant and never re-inspects
//! the raw text.

use std::fmt;

use crate::error::ProtocolError;

/// A parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `REGISTER <udpPort> [<name>]`
    Register { udp_port: u16, name: Option<String> },
    /// `JOIN`
    Join,
    /// `LEAVE`
    Leave,
    /// `MUTE`
    Mute,
    /// `UNMUTE`
    Unmute,
    /// `SYNC`
    Sync,
}

impl Command {
    /// Parse a single control line (without its trailing newline)
    ///
    /// Verbs are matched case-insensitively.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(ProtocolError::EmptyLine)?;

        match verb.to_ascii_uppercase().as_str() {
            "REGISTER" => {
                let port = parts
                    .next()
                    .ok_or(ProtocolError::MissingArgument("udpPort"))?;
                let udp_port = port
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| ProtocolError::InvalidPort(port.to_string()))?;
                let name = parts.next().map(str::to_string);

                Ok(Command::Register { udp_port, name })
            }
            "JOIN" => Ok(Command::Join),
            "LEAVE" => Ok(Command::Leave),
            "MUTE" => Ok(Command::Mute),
            "UNMUTE" => Ok(Command::Unmute),
            "SYNC" => Ok(Command::Sync),
            _ => Err(ProtocolError::UnknownCommand(verb.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Register {
                udp_port,
                name: Some(name),
            } => write!(f, "REGISTER {} {}", udp_port, name),
            Command::Register {
                udp_port,
                name: None,
            } => write!(f, "REGISTER {}", udp_port),
            Command::Join => f.write_str("JOIN"),
            Command::Leave => f.write_str("LEAVE"),
            Command::Mute => f.write_str("MUTE"),
            Command::Unmute => f.write_str("UNMUTE"),
            Command::Sync => f.write_str("SYNC"),
        }
    }
}
