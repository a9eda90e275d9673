//! UDP media datagram codec
//!
//! Every media datagram carries a fixed big-endian header followed by the
//! audio payload:
//!
//! ```text
//!  0                   4                   8         10
//! +-------------------+-------------------+---------+----------------+
//! | sender id (u32)   | sequence (u32)    | len u16 | payload (len)  |
//! +-------------------+-------------------+---------+----------------+
//! ```
//!
//! A zero-length payload is a keepalive / NAT punch and carries no audio.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::MEDIA_HEADER_SIZE;
use crate::registry::frame::{AudioFrame, ClientId};

/// Decoded fixed header of a media datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaHeader {
    pub sender_id: ClientId,
    pub sequence: u32,
    pub payload_len: u16,
}

impl MediaHeader {
    /// Parse the header from the front of `data` without consuming it
    pub fn peek(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < MEDIA_HEADER_SIZE {
            return Err(ProtocolError::TruncatedDatagram { len: data.len() });
        }

        let mut buf = &data[..MEDIA_HEADER_SIZE];
        Ok(Self {
            sender_id: buf.get_u32(),
            sequence: buf.get_u32(),
            payload_len: buf.get_u16(),
        })
    }

    /// Write the header into `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.sender_id);
        buf.put_u32(self.sequence);
        buf.put_u16(self.payload_len);
    }
}

/// Decode a datagram into an [`AudioFrame`]
///
/// The payload is a zero-copy slice of `data`. Rejects datagrams whose
/// declared length disagrees with the actual size, or whose payload exceeds
/// `max_payload`.
pub fn decode(data: Bytes, max_payload: usize) -> Result<AudioFrame, ProtocolError> {
    let header = MediaHeader::peek(&data)?;
    let declared = header.payload_len as usize;

    if declared > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            len: declared,
            max: max_payload,
        });
    }

    let actual = data.len() - MEDIA_HEADER_SIZE;
    if declared != actual {
        return Err(ProtocolError::LengthMismatch { declared, actual });
    }

    let payload = data.slice(MEDIA_HEADER_SIZE..);
    Ok(AudioFrame::new(header.sender_id, header.sequence, payload))
}

/// Encode a frame as a datagram ready to send
pub fn encode(frame: &AudioFrame) -> Bytes {
    encode_parts(frame.sender_id, frame.sequence, &frame.payload)
}

/// Encode a datagram from its parts
///
/// Payloads longer than `u16::MAX` are truncated to fit the length field.
pub fn encode_parts(sender_id: ClientId, sequence: u32, payload: &[u8]) -> Bytes {
    let len = payload.len().min(u16::MAX as usize);
    let mut buf = BytesMut::with_capacity(MEDIA_HEADER_SIZE + len);

    MediaHeader {
        sender_id,
        sequence,
        payload_len: len as u16,
    }
    .encode_into(&mut buf);
    buf.put_slice(&payload[..len]);

    buf.freeze()
}
