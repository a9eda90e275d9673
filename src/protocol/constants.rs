//! Protocol constants

use std::time::Duration;

/// Size of the fixed UDP media header (sender id + sequence + payload length)
pub const MEDIA_HEADER_SIZE: usize = 10;

/// Default maximum audio payload per frame (20 ms of 8 kHz 16-bit mono PCM)
pub const DEFAULT_MAX_PAYLOAD: usize = 320;

/// Receive buffer size for media datagrams (standard MTU)
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Default TCP control port
pub const DEFAULT_CONTROL_PORT: u16 = 4444;

/// Default UDP media port
pub const DEFAULT_MEDIA_PORT: u16 = 5555;

/// Per-sender reorder buffer capacity (frames)
pub const REORDER_CAPACITY: usize = 200;

/// Playback jitter buffer capacity (frames)
pub const JITTER_CAPACITY: usize = 200;

/// Frames that must be queued before playback emits the oldest one
pub const JITTER_THRESHOLD: usize = 2;

/// Duration of one audio frame at the default payload size
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Interval between keepalive frames while a client is muted
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Name assigned when REGISTER carries none
pub const DEFAULT_USERNAME: &str = "Guest";

/// Separator between a username and its disambiguation suffix
pub const NAME_SUFFIX_SEPARATOR: char = '#';

/// Longest accepted control line, excluding the newline
pub const MAX_CONTROL_LINE: usize = 1024;
