//! Wire protocols
//!
//! Two channels connect a client to the relay:
//!
//! - a TCP control connection carrying newline-delimited UTF-8 lines
//!   ([`Command`] upstream, [`ServerMessage`] downstream)
//! - a UDP media path carrying fixed-header audio datagrams ([`datagram`])

pub mod command;
pub mod constants;
pub mod datagram;
pub mod message;

pub use command::Command;
pub use datagram::MediaHeader;
pub use message::ServerMessage;
