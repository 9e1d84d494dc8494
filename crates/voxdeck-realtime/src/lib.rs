//! Realtime voice session over WebRTC.
//!
//! [`RealtimeSession`] owns the whole connection lifecycle: ephemeral
//! credential fetch, microphone capture into an Opus track, data-channel
//! creation, the SDP offer/answer exchange, and dispatch of inbound UI
//! events into the shared widget store.

pub mod credentials;
pub mod events;
pub mod session;
pub mod sink;

pub use credentials::EphemeralSession;
pub use events::ChannelMessage;
pub use session::{ConnectOptions, RealtimeSession, SessionStatus};
pub use sink::{AudioSink, NullAudioSink, SpeakerSink};
