//! Audio sink — where remote audio tracks get rendered.
//!
//! The connector doesn't touch audio hardware directly; it hands remote
//! tracks to an injected [`AudioSink`], which keeps the negotiation logic
//! testable without a playback device.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webrtc::track::track_remote::TrackRemote;

use voxdeck_core::Result;
use voxdeck_media::codec::AudioDecoder;
use voxdeck_media::playback::{AudioPlayback, PlaybackConfig};

/// Remote audio sample rate (Opus native).
const REMOTE_SAMPLE_RATE: u32 = 48000;
const REMOTE_CHANNELS: u16 = 1;

/// Accepts a remote media track and renders it.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn attach(&self, track: Arc<TrackRemote>) -> Result<()>;
}

/// Sink that discards remote audio. Used in tests and headless runs.
pub struct NullAudioSink;

#[async_trait]
impl AudioSink for NullAudioSink {
    async fn attach(&self, track: Arc<TrackRemote>) -> Result<()> {
        debug!(ssrc = track.ssrc(), "Remote track attached to null sink");
        Ok(())
    }
}

/// Sink that Opus-decodes remote audio into the default speaker.
///
/// The playback stream is created lazily on the first attached track and
/// reused for every subsequent track and session.
pub struct SpeakerSink {
    playback: Mutex<Option<Arc<AudioPlayback>>>,
    config: PlaybackConfig,
}

impl SpeakerSink {
    pub fn new() -> Self {
        Self {
            playback: Mutex::new(None),
            config: PlaybackConfig {
                sample_rate: REMOTE_SAMPLE_RATE,
                channels: REMOTE_CHANNELS,
            },
        }
    }

    async fn ensure_playback(&self) -> Result<Arc<AudioPlayback>> {
        let mut playback = self.playback.lock().await;
        if let Some(existing) = playback.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let started = Arc::new(AudioPlayback::start(self.config.clone())?);
        *playback = Some(Arc::clone(&started));
        Ok(started)
    }
}

impl Default for SpeakerSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for SpeakerSink {
    async fn attach(&self, track: Arc<TrackRemote>) -> Result<()> {
        let playback = self.ensure_playback().await?;
        let mut decoder = AudioDecoder::new(REMOTE_SAMPLE_RATE, REMOTE_CHANNELS)?;

        debug!(ssrc = track.ssrc(), "Rendering remote audio track");

        tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                if packet.payload.is_empty() {
                    continue;
                }
                match decoder.decode(&packet.payload) {
                    Ok(samples) => playback.queue(&samples),
                    Err(e) => warn!(error = %e, "Remote audio decode failed"),
                }
            }
            debug!("Remote audio track ended");
        });

        Ok(())
    }
}
