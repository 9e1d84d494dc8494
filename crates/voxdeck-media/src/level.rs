//! Voice-activity level metering.
//!
//! [`LevelMeter`] is the pure per-frame math: RMS over byte-scaled
//! frequency bins shaped into a smoothed 0..1 activity level.
//! [`VoiceLevelDetector`] owns the mic capture and analysis loop and
//! publishes the level on watch channels for UI binding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use voxdeck_core::Result;
use voxdeck_core::config::AudioConfig;

use crate::capture::{CaptureConfig, MicCapture};
use crate::spectrum::{DEFAULT_BIN_SMOOTHING, DEFAULT_FFT_SIZE, SpectrumAnalyzer};

/// Empirical ceiling for normalizing the bin RMS into 0..1.
const NORMALIZATION_CEILING: f32 = 120.0;

/// Exponent shaping the response curve above the sensitivity threshold.
const RESPONSE_EXPONENT: f32 = 0.8;

/// Final boost applied to the smoothed level, clamped to 1.0.
const OUTPUT_BOOST: f32 = 1.1;

/// ~60 level updates per second.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Level detector configuration.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Normalized level below which the output is forced to 0.
    pub sensitivity: f32,
    /// Exponential moving average factor across frames.
    pub smoothing: f32,
    /// Microphone capture settings.
    pub capture: CaptureConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.08,
            smoothing: 0.85,
            capture: CaptureConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Build a detector config from the `[audio]` config section.
    pub fn from_audio_config(audio: &AudioConfig) -> Self {
        let defaults = Self::default();
        Self {
            sensitivity: audio.sensitivity.unwrap_or(defaults.sensitivity),
            smoothing: audio.smoothing.unwrap_or(defaults.smoothing),
            capture: CaptureConfig {
                device: audio.input_device.clone(),
                ..CaptureConfig::default()
            },
        }
    }
}

/// Per-frame level computation over byte-scaled frequency bins.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    sensitivity: f32,
    smoothing: f32,
    smoothed: f32,
}

impl LevelMeter {
    pub fn new(sensitivity: f32, smoothing: f32) -> Self {
        Self {
            sensitivity,
            smoothing: smoothing.clamp(0.0, 1.0),
            smoothed: 0.0,
        }
    }

    /// Fold one frame of frequency bins into the running level.
    pub fn update(&mut self, bins: &[u8]) -> f32 {
        let rms = if bins.is_empty() {
            0.0
        } else {
            let sum: f32 = bins.iter().map(|&b| (b as f32) * (b as f32)).sum();
            (sum / bins.len() as f32).sqrt()
        };

        let normalized = (rms / NORMALIZATION_CEILING).min(1.0);
        let adjusted = if normalized > self.sensitivity {
            normalized.powf(RESPONSE_EXPONENT)
        } else {
            0.0
        };

        self.smoothed = self.smoothed * self.smoothing + adjusted * (1.0 - self.smoothing);
        (self.smoothed * OUTPUT_BOOST).min(1.0)
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}

struct ActiveListener {
    capture: MicCapture,
    cancel: CancellationToken,
}

impl Drop for ActiveListener {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.capture.stop();
    }
}

/// Microphone activity detector publishing a smoothed 0..1 level.
pub struct VoiceLevelDetector {
    config: DetectorConfig,
    initializing: AtomicBool,
    active: Mutex<Option<ActiveListener>>,
    is_listening_tx: watch::Sender<bool>,
    audio_level_tx: watch::Sender<f32>,
    is_supported_tx: watch::Sender<bool>,
    error_tx: watch::Sender<Option<String>>,
}

impl VoiceLevelDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            initializing: AtomicBool::new(false),
            active: Mutex::new(None),
            is_listening_tx: watch::Sender::new(false),
            audio_level_tx: watch::Sender::new(0.0),
            is_supported_tx: watch::Sender::new(true),
            error_tx: watch::Sender::new(None),
        }
    }

    /// Acquire the microphone and start the analysis loop.
    ///
    /// Re-entrant calls while a start is in flight are ignored. Any prior
    /// capture is torn down before reacquiring. On failure the error is
    /// published, `is_supported` goes false, and `is_listening` stays false.
    pub async fn start_listening(&self) -> Result<()> {
        if self
            .initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("start_listening already in flight");
            return Ok(());
        }

        let result = self.try_start().await;
        self.initializing.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            error!(error = %e, "Voice detection failed to start");
            self.error_tx.send_replace(Some(e.to_string()));
            self.is_supported_tx.send_replace(false);
            self.is_listening_tx.send_replace(false);
        }
        result
    }

    async fn try_start(&self) -> Result<()> {
        // Release any previous capture before reacquiring the mic.
        self.shutdown_active().await;
        self.error_tx.send_replace(None);

        let (capture, mut samples_rx) = MicCapture::start(self.config.capture.clone())?;
        info!(device = %capture.device_name(), "Voice detection listening");

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let audio_level_tx = self.audio_level_tx.clone();
        let mut analyzer = SpectrumAnalyzer::new(DEFAULT_FFT_SIZE, DEFAULT_BIN_SMOOTHING);
        let mut meter = LevelMeter::new(self.config.sensitivity, self.config.smoothing);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_INTERVAL);
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        while let Ok(buffer) = samples_rx.try_recv() {
                            analyzer.push_samples(&buffer);
                        }
                        let bins = analyzer.byte_frequency_data();
                        audio_level_tx.send_replace(meter.update(&bins));
                    }
                }
            }
            debug!("level analysis loop ended");
        });

        *self.active.lock().await = Some(ActiveListener { capture, cancel });
        self.is_listening_tx.send_replace(true);
        Ok(())
    }

    /// Stop the analysis loop and release the microphone.
    ///
    /// Safe to call repeatedly, including when never started.
    pub async fn stop_listening(&self) {
        self.is_listening_tx.send_replace(false);
        self.shutdown_active().await;
        self.audio_level_tx.send_replace(0.0);
    }

    async fn shutdown_active(&self) {
        if let Some(active) = self.active.lock().await.take() {
            drop(active);
        }
    }

    pub fn is_listening(&self) -> watch::Receiver<bool> {
        self.is_listening_tx.subscribe()
    }

    pub fn audio_level(&self) -> watch::Receiver<f32> {
        self.audio_level_tx.subscribe()
    }

    pub fn is_supported(&self) -> watch::Receiver<bool> {
        self.is_supported_tx.subscribe()
    }

    pub fn error(&self) -> watch::Receiver<Option<String>> {
        self.error_tx.subscribe()
    }

    /// Current level without subscribing.
    pub fn current_level(&self) -> f32 {
        *self.audio_level_tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_stays_zero() {
        let mut meter = LevelMeter::new(0.08, 0.85);
        for _ in 0..10 {
            assert_eq!(meter.update(&[0u8; 128]), 0.0);
        }
    }

    #[test]
    fn test_silence_convergence_from_any_state() {
        let mut meter = LevelMeter::new(0.08, 0.85);
        // Drive the level up first.
        for _ in 0..50 {
            meter.update(&[255u8; 128]);
        }
        assert!(meter.update(&[255u8; 128]) > 0.5);

        // Then feed silence: the level must converge toward zero.
        let mut last = f32::MAX;
        for _ in 0..200 {
            let level = meter.update(&[0u8; 128]);
            assert!(level <= last);
            last = level;
        }
        assert!(last < 1e-3, "level did not converge: {last}");
    }

    #[test]
    fn test_sub_threshold_bins_force_zero() {
        let mut meter = LevelMeter::new(0.08, 0.85);
        // RMS 5 → normalized ~0.042, below the 0.08 threshold.
        assert_eq!(meter.update(&[5u8; 128]), 0.0);
    }

    #[test]
    fn test_loud_input_clamps_to_one() {
        let mut meter = LevelMeter::new(0.08, 0.0);
        // smoothing 0: adjusted passes straight through, boost clamps.
        let level = meter.update(&[255u8; 128]);
        assert_eq!(level, 1.0);
    }

    #[test]
    fn test_empty_bins_are_silence() {
        let mut meter = LevelMeter::new(0.08, 0.85);
        assert_eq!(meter.update(&[]), 0.0);
    }

    #[test]
    fn test_reset() {
        let mut meter = LevelMeter::new(0.08, 0.85);
        meter.update(&[255u8; 128]);
        meter.reset();
        assert_eq!(meter.update(&[0u8; 128]), 0.0);
    }

    #[tokio::test]
    async fn test_stop_twice_is_safe() {
        let detector = VoiceLevelDetector::new(DetectorConfig::default());
        detector.stop_listening().await;
        detector.stop_listening().await;
        assert_eq!(detector.current_level(), 0.0);
        assert!(!*detector.is_listening().borrow());
    }

    #[tokio::test]
    async fn test_start_failure_sets_error_state() {
        let config = DetectorConfig {
            capture: CaptureConfig {
                device: Some("voxdeck-no-such-device".into()),
                ..CaptureConfig::default()
            },
            ..DetectorConfig::default()
        };
        let detector = VoiceLevelDetector::new(config);

        assert!(detector.start_listening().await.is_err());
        assert!(detector.error().borrow().is_some());
        assert!(!*detector.is_supported().borrow());
        assert!(!*detector.is_listening().borrow());
    }
}
