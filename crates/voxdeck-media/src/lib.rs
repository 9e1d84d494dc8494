//! Audio pipeline — capture, playback, opus codec, and level metering.

pub mod capture;
pub mod codec;
pub mod devices;
pub mod level;
pub mod playback;
pub mod spectrum;

pub use capture::{CaptureConfig, MicCapture};
pub use level::{DetectorConfig, LevelMeter, VoiceLevelDetector};
pub use playback::{AudioPlayback, PlaybackConfig};
