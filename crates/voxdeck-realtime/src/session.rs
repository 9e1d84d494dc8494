//! Realtime session lifecycle — credential fetch, peer connection,
//! SDP exchange, and data-channel wiring.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use voxdeck_core::config::RealtimeConfig;
use voxdeck_core::{Result, SharedUiStore, VoxDeckError};
use voxdeck_media::capture::{CaptureConfig, MicCapture};
use voxdeck_media::codec::AudioEncoder;

use crate::credentials;
use crate::events::{self, ChannelMessage};
use crate::sink::AudioSink;

/// Label of the control/event data channel.
const DATA_CHANNEL_LABEL: &str = "oai-events";

const MIC_SAMPLE_RATE: u32 = 48000;
const MIC_CHANNELS: u16 = 1;

/// 20 ms mic frames at 48 kHz mono.
const FRAME_SAMPLES: usize = 960;
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Connection status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Live,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-connect options.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Voice selector forwarded to the credential endpoint.
    pub voice: Option<String>,
}

/// A realtime voice session.
///
/// One live connection at a time per instance. Status transitions are
/// published on a watch channel; every data-channel message is appended
/// to an accumulating log that survives `disconnect()`.
pub struct RealtimeSession {
    config: RealtimeConfig,
    capture_config: CaptureConfig,
    session_id: String,
    http: reqwest::Client,
    store: SharedUiStore,
    sink: Arc<dyn AudioSink>,
    status_tx: watch::Sender<SessionStatus>,
    messages: Arc<RwLock<Vec<ChannelMessage>>>,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    mic: Mutex<Option<MicCapture>>,
    pump_cancel: Mutex<Option<CancellationToken>>,
}

impl RealtimeSession {
    pub fn new(config: RealtimeConfig, store: SharedUiStore, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            config,
            capture_config: CaptureConfig::default(),
            session_id: uuid::Uuid::new_v4().to_string(),
            http: reqwest::Client::new(),
            store,
            sink,
            status_tx: watch::Sender::new(SessionStatus::Idle),
            messages: Arc::new(RwLock::new(Vec::new())),
            pc: Mutex::new(None),
            mic: Mutex::new(None),
            pump_cancel: Mutex::new(None),
        }
    }

    /// Override the microphone capture settings.
    pub fn with_capture_config(mut self, capture_config: CaptureConfig) -> Self {
        self.capture_config = capture_config;
        self
    }

    /// Subscribe to status transitions.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn current_status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Snapshot of every message received so far, in arrival order.
    pub async fn messages(&self) -> Vec<ChannelMessage> {
        self.messages.read().await.clone()
    }

    /// The widget store this session dispatches into.
    pub fn store(&self) -> SharedUiStore {
        Arc::clone(&self.store)
    }

    /// Establish the session end-to-end.
    ///
    /// Any failure along the way collapses to `SessionStatus::Error` with
    /// the cause logged; there is no automatic retry and no partial
    /// transition to `Live`.
    pub async fn connect(&self, opts: ConnectOptions) -> Result<()> {
        self.status_tx.send_replace(SessionStatus::Connecting);
        info!(session = %self.session_id, "Connecting realtime session");

        match self.establish(&opts).await {
            Ok(()) => {
                self.status_tx.send_replace(SessionStatus::Live);
                info!(session = %self.session_id, "Realtime session live");
                Ok(())
            }
            Err(e) => {
                error!(session = %self.session_id, error = %e, "Realtime session failed");
                self.teardown().await;
                self.status_tx.send_replace(SessionStatus::Error);
                Err(e)
            }
        }
    }

    /// Close the peer connection and return to `Idle`.
    ///
    /// Accumulated messages are retained.
    pub async fn disconnect(&self) {
        info!(session = %self.session_id, "Disconnecting realtime session");
        self.teardown().await;
        self.status_tx.send_replace(SessionStatus::Idle);
    }

    async fn establish(&self, opts: &ConnectOptions) -> Result<()> {
        let token = self.acquire_token(opts).await?;

        // Exclusive microphone access, released on disconnect.
        let (capture, samples_rx) = MicCapture::start(self.capture_config.clone())?;
        *self.mic.lock().await = Some(capture);

        let pc = self.build_peer_connection().await?;
        *self.pc.lock().await = Some(Arc::clone(&pc));

        // Remote audio goes to the injected sink.
        let sink = Arc::clone(&self.sink);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                if let Err(e) = sink.attach(track).await {
                    warn!(error = %e, "Audio sink attach failed");
                }
            })
        }));

        self.attach_mic_track(&pc, samples_rx).await?;

        let channel = pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(|e| VoxDeckError::Rtc(format!("Failed to create data channel: {e}")))?;
        self.install_channel_handlers(&channel);

        // Offer/answer handshake. With no trickle path to the remote API,
        // wait for ICE gathering before shipping the offer.
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| VoxDeckError::Sdp(format!("Failed to create offer: {e}")))?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer)
            .await
            .map_err(|e| VoxDeckError::Sdp(format!("Failed to set local description: {e}")))?;
        let _ = gather_complete.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| VoxDeckError::Sdp("No local description after offer".into()))?;

        let answer_sdp = self.exchange_sdp(&local.sdp, &token).await?;
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| VoxDeckError::Sdp(format!("Failed to parse answer: {e}")))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| VoxDeckError::Sdp(format!("Failed to set remote description: {e}")))?;

        Ok(())
    }

    async fn acquire_token(&self, opts: &ConnectOptions) -> Result<String> {
        let voice = opts.voice.as_deref().or(self.config.voice.as_deref());

        if let Some(url) = self.config.session_url.as_deref() {
            let session = credentials::fetch_ephemeral_session(&self.http, url, voice).await?;
            return Ok(session.client_secret.value);
        }
        if let Some(key) = self.config.resolve_api_key() {
            debug!("No session endpoint configured, using direct API key");
            return Ok(key);
        }
        Err(VoxDeckError::Credential(
            "No session endpoint or API key configured".into(),
        ))
    }

    async fn build_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| VoxDeckError::Rtc(format!("Failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| VoxDeckError::Rtc(format!("Failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = self
            .config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| VoxDeckError::Rtc(format!("Failed to create peer connection: {e}")))?,
        );

        let session_id = self.session_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let session_id = session_id.clone();
            Box::pin(async move {
                debug!(session = %session_id, ?state, "Peer connection state changed");
            })
        }));

        Ok(pc)
    }

    /// Add the local Opus track and start pumping encoded mic frames into it.
    async fn attach_mic_track(
        &self,
        pc: &Arc<RTCPeerConnection>,
        mut samples_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    ) -> Result<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "voxdeck-mic".to_owned(),
            "voxdeck".to_owned(),
        ));

        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| VoxDeckError::Rtc(format!("Failed to add audio track: {e}")))?;

        let mut encoder = AudioEncoder::new(MIC_SAMPLE_RATE, MIC_CHANNELS)?;
        let cancel = CancellationToken::new();
        *self.pump_cancel.lock().await = Some(cancel.clone());

        tokio::spawn(async move {
            let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = samples_rx.recv() => {
                        let Some(buffer) = received else { break };
                        pending.extend_from_slice(&buffer);
                        while pending.len() >= FRAME_SAMPLES {
                            let frame: Vec<f32> = pending.drain(..FRAME_SAMPLES).collect();
                            let packet = match encoder.encode(&frame) {
                                Ok(packet) => packet,
                                Err(e) => {
                                    warn!(error = %e, "Mic frame encode failed");
                                    continue;
                                }
                            };
                            let sample = Sample {
                                data: Bytes::from(packet),
                                duration: FRAME_DURATION,
                                ..Default::default()
                            };
                            if let Err(e) = track.write_sample(&sample).await {
                                debug!(error = %e, "Mic sample write failed");
                            }
                        }
                    }
                }
            }
            debug!("Mic pump ended");
        });

        Ok(())
    }

    fn install_channel_handlers(&self, channel: &Arc<RTCDataChannel>) {
        let label = channel.label().to_string();
        channel.on_open(Box::new(move || {
            let label = label.clone();
            Box::pin(async move {
                debug!(label, "Data channel open");
            })
        }));

        let messages = Arc::clone(&self.messages);
        let store = Arc::clone(&self.store);
        let reply_channel = Arc::downgrade(channel);

        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let messages = Arc::clone(&messages);
            let store = Arc::clone(&store);
            let reply_channel = reply_channel.clone();

            Box::pin(async move {
                let text = String::from_utf8_lossy(&msg.data).to_string();
                let confirmation = events::apply_channel_text(&text, &messages, &store).await;

                let Some(confirmation) = confirmation else {
                    return;
                };
                let Some(channel) = reply_channel.upgrade() else {
                    return;
                };
                if channel.ready_state() != RTCDataChannelState::Open {
                    return;
                }
                let item = events::assistant_text_item(&confirmation);
                if let Err(e) = channel.send_text(item.to_string()).await {
                    warn!(error = %e, "Failed to send confirmation");
                }
            })
        }));
    }

    async fn exchange_sdp(&self, offer_sdp: &str, token: &str) -> Result<String> {
        let url = format!("{}?model={}", self.config.base_url(), self.config.model());
        debug!(url = %url, "Posting SDP offer");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| VoxDeckError::Sdp(format!("SDP exchange failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body, "SDP exchange rejected");
            return Err(VoxDeckError::Sdp("SDP exchange failed".into()));
        }

        response
            .text()
            .await
            .map_err(|e| VoxDeckError::Sdp(format!("Failed to read SDP answer: {e}")))
    }

    async fn teardown(&self) {
        if let Some(cancel) = self.pump_cancel.lock().await.take() {
            cancel.cancel();
        }
        if let Some(mic) = self.mic.lock().await.take() {
            mic.stop();
        }
        if let Some(pc) = self.pc.lock().await.take() {
            if let Err(e) = pc.close().await {
                debug!(error = %e, "Peer connection close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullAudioSink;
    use voxdeck_core::UiStore;

    fn session_with(config: RealtimeConfig) -> RealtimeSession {
        RealtimeSession::new(config, UiStore::shared(), Arc::new(NullAudioSink))
    }

    #[tokio::test]
    async fn test_initial_status_idle() {
        let session = session_with(RealtimeConfig::default());
        assert_eq!(session.current_status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_credential_failure_goes_error_never_live() {
        // Nothing listens on the discard port, so the credential fetch
        // fails before any media or WebRTC work starts.
        let session = session_with(RealtimeConfig {
            session_url: Some("http://127.0.0.1:9/realtime/session".into()),
            ..Default::default()
        });

        let result = session.connect(ConnectOptions::default()).await;
        assert!(matches!(result, Err(VoxDeckError::Credential(_))));
        assert_eq!(session.current_status(), SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_missing_credentials_config() {
        let session = session_with(RealtimeConfig::default());

        let result = session.connect(ConnectOptions::default()).await;
        assert!(matches!(result, Err(VoxDeckError::Credential(_))));
        assert_eq!(session.current_status(), SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_messages_survive_disconnect() {
        let session = session_with(RealtimeConfig::default());
        session
            .messages
            .write()
            .await
            .push(ChannelMessage::Raw("leftover".into()));

        session.disconnect().await;
        assert_eq!(session.current_status(), SessionStatus::Idle);
        assert_eq!(session.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let session = session_with(RealtimeConfig::default());
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.current_status(), SessionStatus::Idle);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Connecting.to_string(), "connecting");
        assert_eq!(SessionStatus::Live.to_string(), "live");
    }
}
