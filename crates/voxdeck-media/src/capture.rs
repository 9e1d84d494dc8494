//! Microphone capture using cpal.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread
//! and captured buffers are handed off over a channel. The microphone is
//! released when [`MicCapture::stop`] is called or the handle is dropped.

use std::sync::Mutex;
use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use voxdeck_core::{Result, VoxDeckError};

use crate::devices::find_input_device;

/// Audio capture configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name substring (default device when unset).
    pub device: Option<String>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 48000,
            channels: 1,
        }
    }
}

/// Handle for a running microphone capture.
pub struct MicCapture {
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
    device_name: String,
}

impl MicCapture {
    /// Start capturing, returning the handle and a buffer receiver.
    ///
    /// Device lookup and stream startup happen on the capture thread; any
    /// failure there is returned synchronously.
    pub fn start(config: CaptureConfig) -> Result<(Self, mpsc::UnboundedReceiver<Vec<f32>>)> {
        let (buffer_tx, buffer_rx) = mpsc::unbounded_channel::<Vec<f32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<String>>();

        std::thread::Builder::new()
            .name("voxdeck-mic".into())
            .spawn(move || {
                let stream = match build_input_stream(&config, buffer_tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Hold the stream until stop is signalled (or the handle drops).
                let _ = stop_rx.recv();
                drop(stream);
                debug!("microphone capture stopped");
            })
            .map_err(|e| VoxDeckError::Media(format!("Failed to spawn capture thread: {e}")))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| VoxDeckError::Media("Capture thread exited unexpectedly".into()))??;

        Ok((
            Self {
                stop_tx: Mutex::new(Some(stop_tx)),
                device_name,
            },
            buffer_rx,
        ))
    }

    /// Stop the capture and release the microphone. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().expect("capture stop lock").take() {
            let _ = tx.send(());
        }
    }

    /// The device name being captured from.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    config: &CaptureConfig,
    buffer_tx: mpsc::UnboundedSender<Vec<f32>>,
) -> Result<(cpal::Stream, String)> {
    let device = resolve_device(config)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    info!(
        device = %device_name,
        sample_rate = config.sample_rate,
        channels = config.channels,
        "Starting microphone capture"
    );

    let supported = device
        .supported_input_configs()
        .map_err(|e| VoxDeckError::Media(format!("Failed to query input configs: {e}")))?
        .find(|c| {
            c.channels() == config.channels
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate().0 <= config.sample_rate
                && config.sample_rate <= c.max_sample_rate().0
        })
        .ok_or_else(|| {
            VoxDeckError::Media(format!(
                "Device '{}' doesn't support {} Hz / {} channel f32 input",
                device_name, config.sample_rate, config.channels
            ))
        })?
        .with_sample_rate(SampleRate(config.sample_rate));

    let stream = device
        .build_input_stream(
            &supported.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = buffer_tx.send(data.to_vec());
            },
            |err| {
                error!("Audio capture error: {err}");
            },
            None,
        )
        .map_err(|e| VoxDeckError::Media(format!("Failed to open input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoxDeckError::Media(format!("Failed to start input stream: {e}")))?;

    Ok((stream, device_name))
}

fn resolve_device(config: &CaptureConfig) -> Result<Device> {
    match &config.device {
        Some(name) => find_input_device(name),
        None => cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoxDeckError::Media("No default input device available".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 1);
        assert!(config.device.is_none());
    }

    #[test]
    fn test_start_with_missing_device_errors() {
        let config = CaptureConfig {
            device: Some("voxdeck-no-such-device".into()),
            ..Default::default()
        };
        assert!(MicCapture::start(config).is_err());
    }
}
