//! Opus encode/decode wrappers for the WebRTC audio path.

use voxdeck_core::{Result, VoxDeckError};

/// Maximum encoded Opus packet size in bytes.
const MAX_PACKET_SIZE: usize = 4000;

/// Maximum decoded frame: 120 ms at 48 kHz per channel.
const MAX_FRAME_SIZE: usize = 5760;

fn opus_channels(channels: u16) -> Result<opus::Channels> {
    match channels {
        1 => Ok(opus::Channels::Mono),
        2 => Ok(opus::Channels::Stereo),
        n => Err(VoxDeckError::Media(format!(
            "Opus supports 1 or 2 channels, got {n}"
        ))),
    }
}

/// Opus encoder for outgoing microphone audio.
pub struct AudioEncoder {
    encoder: opus::Encoder,
}

// SAFETY: the Opus encoder is independent per instance and only ever used
// behind exclusive access; the FFI raw pointers are what block the derive.
unsafe impl Send for AudioEncoder {}

impl AudioEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let encoder =
            opus::Encoder::new(sample_rate, opus_channels(channels)?, opus::Application::Voip)
                .map_err(|e| VoxDeckError::Media(format!("Failed to create Opus encoder: {e}")))?;
        Ok(Self { encoder })
    }

    /// Encode one frame of f32 samples (-1.0..1.0) into an Opus packet.
    pub fn encode(&mut self, samples: &[f32]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_PACKET_SIZE];
        let len = self
            .encoder
            .encode_float(samples, &mut output)
            .map_err(|e| VoxDeckError::Media(format!("Opus encoding failed: {e}")))?;
        output.truncate(len);
        Ok(output)
    }
}

/// Opus decoder for incoming remote audio.
pub struct AudioDecoder {
    decoder: opus::Decoder,
    channels: u16,
}

// SAFETY: same reasoning as AudioEncoder.
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        let decoder = opus::Decoder::new(sample_rate, opus_channels(channels)?)
            .map_err(|e| VoxDeckError::Media(format!("Failed to create Opus decoder: {e}")))?;
        Ok(Self { decoder, channels })
    }

    /// Decode an Opus packet (RTP payload) into f32 samples.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<f32>> {
        let mut output = vec![0f32; MAX_FRAME_SIZE * self.channels as usize];
        let len = self
            .decoder
            .decode_float(payload, &mut output, false)
            .map_err(|e| VoxDeckError::Media(format!("Opus decoding failed: {e}")))?;
        output.truncate(len * self.channels as usize);
        Ok(output)
    }
}
