//! Frequency-domain analysis for the level meter.
//!
//! Mirrors the analyser semantics the level meter expects: a fixed-size
//! FFT over the most recent input window, per-bin exponential smoothing of
//! linear magnitudes, then dB conversion scaled into byte range.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Default FFT size.
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Default per-bin smoothing factor.
pub const DEFAULT_BIN_SMOOTHING: f32 = 0.8;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Streaming spectrum analyzer producing byte-scaled frequency bins.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    samples: VecDeque<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            window: blackman_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            samples: VecDeque::with_capacity(fft_size),
        }
    }

    /// Number of frequency bins produced per frame.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed captured samples; only the most recent FFT window is retained.
    pub fn push_samples(&mut self, samples: &[f32]) {
        for &s in samples {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(s);
        }
    }

    /// Compute the current byte-scaled frequency data (0..255 per bin).
    ///
    /// Missing samples are treated as silence (zero-padded window).
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(self.fft_size);
        let pad = self.fft_size - self.samples.len();
        for _ in 0..pad {
            buffer.push(Complex::new(0.0, 0.0));
        }
        for (i, &s) in self.samples.iter().enumerate() {
            buffer.push(Complex::new(s * self.window[pad + i], 0.0));
        }

        self.fft.process(&mut buffer);

        let scale = 1.0 / self.fft_size as f32;
        let smoothing = self.smoothing;
        buffer
            .iter()
            .take(self.fft_size / 2)
            .zip(self.smoothed.iter_mut())
            .map(|(bin, prev)| {
                let magnitude = bin.norm() * scale;
                *prev = smoothing * *prev + (1.0 - smoothing) * magnitude;
                let db = 20.0 * prev.max(f32::MIN_POSITIVE).log10();
                let normalized = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
                (normalized.clamp(0.0, 1.0) * 255.0) as u8
            })
            .collect()
    }

    /// Clear sample and smoothing state.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed.fill(0.0);
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| {
            let x = i as f32 / (n - 1.0);
            0.42 - 0.5 * (2.0 * std::f32::consts::PI * x).cos()
                + 0.08 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_produces_zero_bins() {
        let mut analyzer = SpectrumAnalyzer::new(DEFAULT_FFT_SIZE, DEFAULT_BIN_SMOOTHING);
        analyzer.push_samples(&vec![0.0; 512]);
        let bins = analyzer.byte_frequency_data();
        assert_eq!(bins.len(), 128);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_no_samples_is_silence() {
        let mut analyzer = SpectrumAnalyzer::new(DEFAULT_FFT_SIZE, DEFAULT_BIN_SMOOTHING);
        let bins = analyzer.byte_frequency_data();
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_tone_raises_some_bin() {
        let mut analyzer = SpectrumAnalyzer::new(DEFAULT_FFT_SIZE, 0.0);
        // 48kHz sine at ~3kHz, full scale
        let samples: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * 3000.0 * i as f32 / 48000.0).sin())
            .collect();
        analyzer.push_samples(&samples);
        let bins = analyzer.byte_frequency_data();
        assert!(bins.iter().any(|&b| b > 0), "expected energy in some bin");
    }

    #[test]
    fn test_reset_clears_smoothing_state() {
        let mut analyzer = SpectrumAnalyzer::new(DEFAULT_FFT_SIZE, 0.9);
        let samples: Vec<f32> = (0..256)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin())
            .collect();
        analyzer.push_samples(&samples);
        let _ = analyzer.byte_frequency_data();

        analyzer.reset();
        let bins = analyzer.byte_frequency_data();
        assert!(bins.iter().all(|&b| b == 0));
    }
}
