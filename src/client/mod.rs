//! Client-side protocol helpers
//!
//! Provides the pieces a participant needs to talk to a relay:
//! - Registering and exchanging control commands over TCP
//! - Sending sequenced audio frames and keepalives over UDP
//! - Jitter-buffered playback of other participants' audio

pub mod audio;
pub mod config;
pub mod control;
pub mod media;
pub mod session;

pub use audio::{run_capture, run_playback, AudioSink, AudioSource};
pub use config::ClientConfig;
pub use control::ControlChannel;
pub use media::{MediaReceiver, MediaSender};
pub use session::VoiceClient;
