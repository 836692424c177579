//! Spectra and samples back to packets.
//!
//! Two ingress paths share one frame synchronizer. The spectrum path is the
//! live microphone pipeline: one byte-magnitude frame per ~50 ms tick,
//! FSK-decided per channel by comparing the two deviation bins. The sample
//! path consumes raw PCM one symbol window at a time and recovers any scheme
//! by I/Q correlation against each carrier, which is what the phase
//! modulations require (a magnitude spectrum cannot carry phase).

use std::f32::consts::TAU;

use tracing::warn;

use crate::calibration::CalibrationResult;
use crate::error::{Result, ToneLinkError};
use crate::modem::sync::FrameSync;
use crate::packet::Packet;
use crate::profile::{ModulationScheme, Profile};
use crate::spectrum::{byte_to_amplitude, byte_to_db, freq_to_bin, SpectrumFrame};
use crate::{FSK_DEVIATION_HZ, SAMPLE_RATE, SIGNAL_THRESHOLD};

pub struct Demodulator {
    profile: Profile,
    carriers: Vec<f32>,
    sync: FrameSync,
    sample_buf: Vec<f32>,
    grid_locked: bool,
    last_snr_db: Option<f32>,
}

impl Demodulator {
    pub fn new(profile: Profile, calibration: &CalibrationResult) -> Result<Self> {
        if calibration.carriers.len() != profile.num_channels {
            return Err(ToneLinkError::InvalidConfig(format!(
                "calibration has {} carriers but profile '{}' needs {}",
                calibration.carriers.len(),
                profile.name,
                profile.num_channels
            )));
        }
        Ok(Self {
            profile,
            carriers: calibration.carriers.clone(),
            sync: FrameSync::new(),
            sample_buf: Vec::new(),
            grid_locked: false,
            last_snr_db: None,
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Reception quality from the most recent decided slot, as
    /// `20*log10(carrier / between-carrier)` over the observed magnitudes.
    pub fn last_snr_db(&self) -> Option<f32> {
        self.last_snr_db
    }

    /// One spectrum tick. FSK only: per channel the two deviation bins are
    /// compared; a channel whose stronger bin is below the detection
    /// threshold is silent and skipped. A tick with no active channel is
    /// discarded; otherwise its bits enter the synchronizer in ascending
    /// channel order.
    pub fn push_spectrum(&mut self, frame: &SpectrumFrame) -> Result<Vec<Packet>> {
        if self.profile.scheme != ModulationScheme::Fsk {
            return Err(ToneLinkError::InvalidConfig(format!(
                "profile '{}' is phase-modulated; feed raw samples instead of spectra",
                self.profile.name
            )));
        }

        let mut slot_bits = Vec::with_capacity(self.carriers.len());
        let mut signal_bytes = Vec::with_capacity(self.carriers.len());
        for &carrier in &self.carriers {
            let low = frame.bin(freq_to_bin(carrier - FSK_DEVIATION_HZ));
            let high = frame.bin(freq_to_bin(carrier + FSK_DEVIATION_HZ));
            let strongest = low.max(high);
            if strongest < SIGNAL_THRESHOLD {
                continue;
            }
            signal_bytes.push(strongest);
            slot_bits.push(high > low);
        }

        if slot_bits.is_empty() {
            return Ok(Vec::new());
        }
        self.update_snr_from_spectrum(frame, &signal_bytes);
        Ok(self.collect_packets(&slot_bits))
    }

    /// Buffered raw-sample ingress. The first signal onset locks the symbol
    /// slot grid (the transmission leads with a chord that starts at peak
    /// amplitude); from then on whole windows are consumed back-to-back, so
    /// the sender's slot-aligned silences keep the grid intact across
    /// inter-packet gaps. Windows below the detection floor decide nothing.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<Vec<Packet>> {
        self.sample_buf.extend_from_slice(samples);
        let sps = self.profile.samples_per_symbol();
        let min_amplitude = byte_to_amplitude(SIGNAL_THRESHOLD);
        let mut packets = Vec::new();

        if !self.grid_locked {
            match self
                .sample_buf
                .iter()
                .position(|s| s.abs() > min_amplitude)
            {
                Some(onset) => {
                    self.sample_buf.drain(..onset);
                    self.grid_locked = true;
                }
                None => {
                    self.sample_buf.clear();
                    return Ok(packets);
                }
            }
        }

        while self.sample_buf.len() >= sps {
            let window: Vec<f32> = self.sample_buf.drain(..sps).collect();
            let rms = (window.iter().map(|s| s * s).sum::<f32>() / sps as f32).sqrt();
            if rms < min_amplitude {
                continue;
            }
            let slot_bits = self.demodulate_window(&window, min_amplitude);
            if !slot_bits.is_empty() {
                packets.extend(self.collect_packets(&slot_bits));
            }
        }

        Ok(packets)
    }

    /// Decide one symbol window. Bits are emitted in deinterleave order: for
    /// each bit position, each channel in ascending index, which restores the
    /// sender's round-robin bit order (and degenerates to plain channel order
    /// for FSK).
    fn demodulate_window(&mut self, window: &[f32], min_amplitude: f32) -> Vec<bool> {
        let scheme = self.profile.scheme;
        let bits_per_symbol = scheme.bits_per_symbol();
        let mut symbols = Vec::with_capacity(self.carriers.len());
        let mut signal_sum = 0.0f32;

        for &carrier in &self.carriers {
            match scheme {
                ModulationScheme::Fsk => {
                    let (low, _) = iq_correlate(window, carrier - FSK_DEVIATION_HZ);
                    let (high, _) = iq_correlate(window, carrier + FSK_DEVIATION_HZ);
                    let strongest = low.max(high);
                    if strongest < min_amplitude {
                        continue;
                    }
                    signal_sum += strongest;
                    symbols.push((high > low) as u8);
                }
                ModulationScheme::Qpsk | ModulationScheme::Psk8 => {
                    let (magnitude, phase) = iq_correlate(window, carrier);
                    if magnitude < min_amplitude {
                        continue;
                    }
                    signal_sum += magnitude;
                    let states = scheme.states() as i64;
                    let step = TAU / states as f32;
                    let index = ((phase / step).round() as i64).rem_euclid(states) as u8;
                    symbols.push(index);
                }
            }
        }

        if symbols.is_empty() {
            return Vec::new();
        }
        self.update_snr_from_window(window, signal_sum / symbols.len() as f32);

        let mut bits = Vec::with_capacity(symbols.len() * bits_per_symbol);
        for position in 0..bits_per_symbol {
            for &value in &symbols {
                bits.push((value >> (bits_per_symbol - 1 - position)) & 1 == 1);
            }
        }
        bits
    }

    fn collect_packets(&mut self, bits: &[bool]) -> Vec<Packet> {
        self.sync
            .push_bits(bits)
            .into_iter()
            .filter_map(|body| match Packet::parse(&body) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable packet body");
                    None
                }
            })
            .collect()
    }

    fn update_snr_from_spectrum(&mut self, frame: &SpectrumFrame, signal_bytes: &[u8]) {
        let signal_db = signal_bytes
            .iter()
            .map(|&byte| byte_to_db(byte))
            .sum::<f32>()
            / signal_bytes.len() as f32;
        let noise_db = self
            .midpoints()
            .map(|freq| byte_to_db(frame.bin(freq_to_bin(freq))))
            .sum::<f32>()
            / (self.carriers.len() - 1) as f32;
        self.last_snr_db = Some(signal_db - noise_db);
    }

    fn update_snr_from_window(&mut self, window: &[f32], mean_signal: f32) {
        let midpoints: Vec<f32> = self.midpoints().collect();
        let noise = midpoints
            .iter()
            .map(|&freq| iq_correlate(window, freq).0)
            .sum::<f32>()
            / midpoints.len() as f32;
        let snr = 20.0 * (mean_signal.max(1e-9) / noise.max(1e-9)).log10();
        self.last_snr_db = Some(snr);
    }

    fn midpoints(&self) -> impl Iterator<Item = f32> + '_ {
        self.carriers
            .windows(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
    }
}

/// Correlate a window against `cos`/`sin` at the given frequency. For an
/// input `A*cos(2*pi*f*t + phi)` spanning the window this returns `(A, phi)`;
/// the carrier comb is spaced so that whole symbol windows hold an integer
/// number of cycles of every carrier and deviation, making the correlators
/// mutually orthogonal.
fn iq_correlate(window: &[f32], freq_hz: f32) -> (f32, f32) {
    let step = TAU * freq_hz / SAMPLE_RATE as f32;
    let mut i_sum = 0.0f64;
    let mut q_sum = 0.0f64;
    for (n, &sample) in window.iter().enumerate() {
        let angle = step * n as f32;
        i_sum += (sample * angle.cos()) as f64;
        q_sum += (sample * angle.sin()) as f64;
    }
    let scale = 2.0 / window.len() as f64;
    let i = (i_sum * scale) as f32;
    let q = (q_sum * scale) as f32;
    let magnitude = (i * i + q * q).sqrt();
    let mut phase = (-q).atan2(i);
    if phase < 0.0 {
        phase += TAU;
    }
    (magnitude, phase)
}
