//! Audio device seams
//!
//! Capture and playback hardware stay outside this crate. Implement
//! [`AudioSource`] and [`AudioSink`] over a device (or a file, or a test
//! fixture) and drive them with [`run_capture`] and [`run_playback`].

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::MissedTickBehavior;

use crate::client::media::{MediaReceiver, MediaSender};
use crate::error::Result;
use crate::registry::frame::ClientId;

/// Producer of fixed-size PCM frames
pub trait AudioSource: Send {
    /// Next captured frame, or `None` when the source is exhausted
    fn read_frame(&mut self) -> impl Future<Output = Option<Bytes>> + Send;
}

/// Consumer of PCM frames
pub trait AudioSink: Send {
    fn write_frame(&mut self, sender: ClientId, pcm: Bytes) -> impl Future<Output = ()> + Send;
}

/// Pump captured frames to the relay until the source runs dry
///
/// Muted frames are discarded and replaced by periodic keepalives. Returns
/// the number of frames sent.
pub async fn run_capture<S: AudioSource>(source: &mut S, sender: &mut MediaSender) -> Result<u64> {
    let mut sent = 0;

    while let Some(frame) = source.read_frame().await {
        if sender.send(&frame).await? {
            sent += 1;
        }
        sender.tick().await?;
    }

    tracing::debug!(frames = sent, "Capture finished");
    Ok(sent)
}

/// Receive relayed audio and play it at `frame_duration` cadence until `stop`
///
/// Each tick releases at most one frame per sender. Returns the number of
/// frames played. Presence events must reach
/// [`MediaReceiver::apply_event`] between runs (or use
/// [`VoiceClient::apply_event`](crate::client::VoiceClient::apply_event)) so a
/// re-registered sender is not refused.
pub async fn run_playback<K, F>(
    receiver: &mut MediaReceiver,
    sink: &mut K,
    frame_duration: Duration,
    stop: F,
) -> Result<u64>
where
    K: AudioSink,
    F: Future<Output = ()>,
{
    tokio::pin!(stop);
    let start = tokio::time::Instant::now() + frame_duration;
    let mut interval = tokio::time::interval_at(start, frame_duration);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut played = 0;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            result = receiver.recv() => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Media receive failed");
                }
            }
            _ = interval.tick() => {
                for (sender, pcm) in receiver.pop_ready() {
                    sink.write_frame(sender, pcm).await;
                    played += 1;
                }
            }
        }
    }

    tracing::debug!(frames = played, "Playback stopped");
    Ok(played)
}
