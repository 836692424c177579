//! Spectrum frames and the reference analyzer.
//!
//! The receive side of the protocol is defined over 4096-bin byte-magnitude
//! spectra produced by the host's audio pipeline (8192-point FFT of mono
//! 44.1 kHz PCM, 0.3 smoothing, dB-mapped to 0-255). This module carries the
//! frame type plus an equivalent analyzer used by the CLI and by tests to
//! synthesize those frames from raw samples.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{Result, ToneLinkError};
use crate::{
    FFT_SIZE, MAX_DECIBELS, MIN_DECIBELS, SAMPLE_RATE, SMOOTHING_TIME_CONSTANT, SPECTRUM_BINS,
};

/// One magnitude spectrum tick: 4096 byte magnitudes, DC upward.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    bins: Vec<u8>,
}

impl SpectrumFrame {
    pub fn new(bins: Vec<u8>) -> Result<Self> {
        if bins.len() != SPECTRUM_BINS {
            return Err(ToneLinkError::InvalidConfig(format!(
                "spectrum frame must have {} bins, got {}",
                SPECTRUM_BINS,
                bins.len()
            )));
        }
        Ok(Self { bins })
    }

    pub fn bin(&self, index: usize) -> u8 {
        self.bins[index]
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }
}

/// Index of the FFT bin whose center is nearest to `freq_hz`.
pub fn freq_to_bin(freq_hz: f32) -> usize {
    (freq_hz * FFT_SIZE as f32 / SAMPLE_RATE as f32).round() as usize
}

/// Center frequency of bin `index` in Hz.
pub fn bin_to_freq(index: usize) -> f32 {
    index as f32 * SAMPLE_RATE as f32 / FFT_SIZE as f32
}

/// Map a linear tone amplitude to the byte magnitude scale: decibels clamped
/// to [MIN_DECIBELS, MAX_DECIBELS] and spread over 0-255.
pub fn amplitude_to_byte(amplitude: f32) -> u8 {
    let db = 20.0 * amplitude.max(1e-12).log10();
    let scaled = (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS) * 255.0;
    scaled.clamp(0.0, 255.0).round() as u8
}

/// Linear amplitude corresponding to a byte magnitude; inverse of
/// [`amplitude_to_byte`]. Used to apply the byte-scale detection threshold to
/// time-domain correlation magnitudes.
pub fn byte_to_amplitude(byte: u8) -> f32 {
    10f32.powf(byte_to_db(byte) / 20.0)
}

pub fn byte_to_db(byte: u8) -> f32 {
    MIN_DECIBELS + byte as f32 / 255.0 * (MAX_DECIBELS - MIN_DECIBELS)
}

/// Reference spectrum analyzer matching the normative host FFT: Hann-windowed
/// 8192-point real FFT with exponential smoothing (time constant 0.3) and the
/// dB byte mapping above. Amplitudes are normalized by the window sum so a
/// unit-amplitude tone reads as amplitude 1.0 regardless of how many samples
/// the caller hands in (shorter blocks are zero-padded).
pub struct SpectrumAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        Self {
            fft,
            input,
            output,
            smoothed: vec![0.0; SPECTRUM_BINS],
        }
    }

    /// Analyze one block of mono samples into a spectrum frame. Blocks longer
    /// than the FFT size are truncated; shorter blocks are zero-padded.
    pub fn analyze(&mut self, samples: &[f32]) -> SpectrumFrame {
        let n = samples.len().min(FFT_SIZE);
        let mut window_sum = 0.0f32;
        self.input.fill(0.0);
        if n > 1 {
            let scale = std::f32::consts::TAU / (n - 1) as f32;
            for i in 0..n {
                let w = 0.5 * (1.0 - (scale * i as f32).cos());
                self.input[i] = samples[i] * w;
                window_sum += w;
            }
        } else if n == 1 {
            self.input[0] = samples[0];
            window_sum = 1.0;
        }

        self.fft
            .process(&mut self.input, &mut self.output)
            .expect("fft buffers are planner-sized");

        let norm = if window_sum > 0.0 { 2.0 / window_sum } else { 0.0 };
        let tau = SMOOTHING_TIME_CONSTANT;
        let mut bins = Vec::with_capacity(SPECTRUM_BINS);
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let amplitude = self.output[k].norm() * norm;
            *smoothed = tau * *smoothed + (1.0 - tau) * amplitude;
            bins.push(amplitude_to_byte(*smoothed));
        }
        SpectrumFrame { bins }
    }

    /// Forget the smoothing history, as if the analyzer had just started.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
