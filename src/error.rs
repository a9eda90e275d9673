//! Error types for the relay
//!
//! Per-packet and per-connection failures are represented here so callers can
//! log and contain them. Only socket bind failures are fatal to the server.

use std::fmt;
use std::io;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or stream I/O failure
    Io(io::Error),
    /// Malformed datagram or control line
    Protocol(ProtocolError),
    /// Registry lookup or state transition failure
    Registry(RegistryError),
    /// An operation did not complete in time
    Timeout,
    /// The peer closed the connection
    ConnectionClosed,
    /// The server answered a request with `ERROR`
    Rejected(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Rejected(reason) => write!(f, "Rejected by server: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Wire-level parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram shorter than the fixed header
    TruncatedDatagram { len: usize },
    /// Declared payload length disagrees with the datagram size
    LengthMismatch { declared: usize, actual: usize },
    /// Payload exceeds the configured maximum
    PayloadTooLarge { len: usize, max: usize },
    /// Blank control line
    EmptyLine,
    /// Control line with an unrecognised verb
    UnknownCommand(String),
    /// REGISTER with a port that is not a valid u16 (or is zero)
    InvalidPort(String),
    /// Required argument missing from a control line
    MissingArgument(&'static str),
    /// Server line that could not be parsed
    InvalidMessage(String),
    /// Control line exceeded the length limit
    LineTooLong { max: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::TruncatedDatagram { len } => {
                write!(f, "datagram too short: {} bytes", len)
            }
            ProtocolError::LengthMismatch { declared, actual } => write!(
                f,
                "declared payload length {} does not match actual {}",
                declared, actual
            ),
            ProtocolError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {} bytes exceeds maximum {}", len, max)
            }
            ProtocolError::EmptyLine => write!(f, "empty command"),
            ProtocolError::UnknownCommand(cmd) => write!(f, "unknown command: {}", cmd),
            ProtocolError::InvalidPort(port) => write!(f, "invalid UDP port: {}", port),
            ProtocolError::MissingArgument(arg) => write!(f, "missing argument: {}", arg),
            ProtocolError::InvalidMessage(line) => write!(f, "invalid server message: {}", line),
            ProtocolError::LineTooLong { max } => {
                write!(f, "control line longer than {} bytes", max)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
