//! Speaker playback using cpal.
//!
//! Same thread-ownership pattern as capture: the output stream lives on a
//! dedicated thread and drains a shared sample queue, so the handle can be
//! held and fed from async code.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::mpsc as std_mpsc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use tracing::{debug, error, info};

use voxdeck_core::{Result, VoxDeckError};

/// Audio playback configuration.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
        }
    }
}

/// Handle for a running speaker stream.
pub struct AudioPlayback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl AudioPlayback {
    /// Start playback on the default output device.
    pub fn start(config: PlaybackConfig) -> Result<Self> {
        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();

        let callback_queue = Arc::clone(&queue);
        std::thread::Builder::new()
            .name("voxdeck-speaker".into())
            .spawn(move || {
                let stream = match build_output_stream(&config, callback_queue) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                drop(stream);
                debug!("speaker playback stopped");
            })
            .map_err(|e| VoxDeckError::Media(format!("Failed to spawn playback thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| VoxDeckError::Media("Playback thread exited unexpectedly".into()))??;

        Ok(Self {
            queue,
            stop_tx: Mutex::new(Some(stop_tx)),
        })
    }

    /// Queue samples for playback.
    pub fn queue(&self, samples: &[f32]) {
        let mut queue = self.queue.lock().expect("playback queue lock");
        queue.extend(samples.iter().copied());
    }

    /// Drop any queued samples.
    pub fn clear(&self) {
        self.queue.lock().expect("playback queue lock").clear();
    }

    /// Samples currently waiting to be played.
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("playback queue lock").len()
    }

    /// Stop playback and release the output device. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().expect("playback stop lock").take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(
    config: &PlaybackConfig,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| VoxDeckError::Media("No output device available".into()))?;

    info!(
        sample_rate = config.sample_rate,
        channels = config.channels,
        "Starting speaker playback"
    );

    let supported = device
        .supported_output_configs()
        .map_err(|e| VoxDeckError::Media(format!("Failed to query output configs: {e}")))?
        .find(|c| {
            c.channels() == config.channels
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate().0 <= config.sample_rate
                && config.sample_rate <= c.max_sample_rate().0
        })
        .ok_or_else(|| {
            VoxDeckError::Media(format!(
                "Output device doesn't support {} Hz / {} channel f32",
                config.sample_rate, config.channels
            ))
        })?
        .with_sample_rate(SampleRate(config.sample_rate));

    let stream = device
        .build_output_stream(
            &supported.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().expect("playback queue lock");
                for sample in data.iter_mut() {
                    *sample = queue.pop_front().unwrap_or(0.0);
                }
            },
            |err| {
                error!("Audio playback error: {err}");
            },
            None,
        )
        .map_err(|e| VoxDeckError::Media(format!("Failed to open output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| VoxDeckError::Media(format!("Failed to start output stream: {e}")))?;

    Ok(stream)
}
