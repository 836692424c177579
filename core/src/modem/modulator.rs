//! Bits to audio: round-robin channel interleave, per-stream symbolization
//! and per-slot chord synthesis.

use std::f32::consts::TAU;

use crate::calibration::CalibrationResult;
use crate::error::{Result, ToneLinkError};
use crate::framing;
use crate::profile::{ModulationScheme, Profile};
use crate::{
    DEFAULT_POWER, FSK_DEVIATION_HZ, MAX_POWER, MIN_POWER, PREAMBLE_CHORDS, PREAMBLE_CHORD_MS,
    PREAMBLE_GAP_MS, SAMPLE_RATE, TARGET_SNR_DB,
};

/// Preamble chords play quieter than data. The chord sits exactly on the
/// carriers, and at full power its spectral skirt at the FSK decision bins
/// (carrier +/- deviation) can cross the detection threshold and read as
/// phantom bits; 12 dB down it stays silent there while remaining loud at
/// the carriers themselves.
const PREAMBLE_GAIN: f32 = 0.25;

/// Output level governor. When adaptive, it chases the target reception SNR
/// reported back by the peer: within a 2 dB deadband it holds, otherwise it
/// nudges power by 10% per report, clamped to the legal range. When not
/// adaptive it stays at the fixed default.
pub struct PowerController {
    power: f32,
    adaptive: bool,
}

impl PowerController {
    pub fn new(adaptive: bool) -> Self {
        Self {
            power: DEFAULT_POWER,
            adaptive,
        }
    }

    pub fn power(&self) -> f32 {
        self.power
    }

    pub fn report_snr(&mut self, snr_db: f32) {
        if !self.adaptive {
            return;
        }
        let error = TARGET_SNR_DB - snr_db;
        if error.abs() < 2.0 {
            return;
        }
        let factor = if error > 0.0 { 1.1 } else { 0.9 };
        self.power = (self.power * factor).clamp(MIN_POWER, MAX_POWER);
    }
}

/// Synthesizes the transmit waveform for one profile and calibration.
pub struct Modulator {
    profile: Profile,
    carriers: Vec<f32>,
    power: PowerController,
}

impl Modulator {
    pub fn new(
        profile: Profile,
        calibration: &CalibrationResult,
        adaptive_power: bool,
    ) -> Result<Self> {
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
            power: PowerController::new(adaptive_power),
        })
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.profile.samples_per_symbol()
    }

    pub fn power(&self) -> f32 {
        self.power.power()
    }

    pub fn report_snr(&mut self, snr_db: f32) {
        self.power.report_snr(snr_db);
    }

    /// Modulate a frame bit sequence into audio. Bits are interleaved across
    /// the channels, grouped into symbols per stream (zero-padded), and every
    /// symbol slot is emitted as one chord of all channels before the next
    /// slot begins.
    pub fn modulate(&self, bits: &[bool]) -> Vec<f32> {
        let scheme = self.profile.scheme;
        let bits_per_symbol = scheme.bits_per_symbol();
        let streams = framing::interleave(bits, self.profile.num_channels);
        let symbols: Vec<Vec<u8>> = streams
            .iter()
            .map(|stream| symbolize(stream, bits_per_symbol))
            .collect();
        let num_slots = symbols.first().map_or(0, Vec::len);

        let sps = self.samples_per_symbol();
        let amplitude = self.power.power() / self.profile.num_channels as f32;
        let mut samples = vec![0.0f32; num_slots * sps];
        for slot in 0..num_slots {
            let window = &mut samples[slot * sps..(slot + 1) * sps];
            for (stream, &carrier) in symbols.iter().zip(&self.carriers) {
                let value = stream[slot];
                match scheme {
                    ModulationScheme::Fsk => {
                        let shift = if value == 1 {
                            FSK_DEVIATION_HZ
                        } else {
                            -FSK_DEVIATION_HZ
                        };
                        add_tone(window, carrier + shift, 0.0, amplitude);
                    }
                    ModulationScheme::Qpsk | ModulationScheme::Psk8 => {
                        add_tone(window, carrier, scheme.phase_for_symbol(value), amplitude);
                    }
                }
            }
        }
        samples
    }

    /// Receiver-priming preamble: three chords of every calibrated carrier,
    /// separated by short silences. Chord and gap lengths are rounded up to
    /// whole symbol slots so a receiver slicing the stream on the slot grid
    /// only ever sees fully-toned or fully-silent windows.
    pub fn preamble(&self) -> Vec<f32> {
        let sps = self.samples_per_symbol();
        let chord_len = round_to_slots(SAMPLE_RATE * PREAMBLE_CHORD_MS as usize / 1000, sps);
        let gap_len = round_to_slots(SAMPLE_RATE * PREAMBLE_GAP_MS as usize / 1000, sps);
        let amplitude = PREAMBLE_GAIN * self.power.power() / self.profile.num_channels as f32;

        let mut chord = vec![0.0f32; chord_len];
        for &carrier in &self.carriers {
            add_tone(&mut chord, carrier, 0.0, amplitude);
        }

        let mut samples =
            Vec::with_capacity(PREAMBLE_CHORDS * chord_len + (PREAMBLE_CHORDS - 1) * gap_len);
        for repeat in 0..PREAMBLE_CHORDS {
            if repeat > 0 {
                samples.extend(std::iter::repeat(0.0).take(gap_len));
            }
            samples.extend_from_slice(&chord);
        }
        samples
    }
}

fn round_to_slots(samples: usize, samples_per_symbol: usize) -> usize {
    samples.div_ceil(samples_per_symbol) * samples_per_symbol
}

/// Group a bit stream into symbol values of `bits_per_symbol` bits, MSB
/// first, zero-padding the tail.
fn symbolize(stream: &[bool], bits_per_symbol: usize) -> Vec<u8> {
    let mut symbols = Vec::with_capacity(stream.len().div_ceil(bits_per_symbol));
    for group in stream.chunks(bits_per_symbol) {
        let mut value = 0u8;
        for position in 0..bits_per_symbol {
            let bit = group.get(position).copied().unwrap_or(false);
            value = value << 1 | bit as u8;
        }
        symbols.push(value);
    }
    symbols
}

/// Add `amplitude * cos(2 pi f t + phase)` into a slot buffer, with time
/// starting at zero for every slot.
fn add_tone(window: &mut [f32], freq_hz: f32, phase: f32, amplitude: f32) {
    let step = TAU * freq_hz / SAMPLE_RATE as f32;
    for (n, sample) in window.iter_mut().enumerate() {
        *sample += amplitude * (step * n as f32 + phase).cos();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use std::f32::consts::PI;

    fn quiet_modulator(profile: Profile) -> Modulator {
        let calibration = CalibrationResult::assume_quiet(&profile).unwrap();
        Modulator::new(profile, &calibration, false).unwrap()
    }

    #[test]
    fn test_carrier_count_must_match_profile() {
        let calibration = CalibrationResult::assume_quiet(&Profile::standard()).unwrap();
        assert!(Modulator::new(Profile::fast(), &calibration, false).is_err());
    }

    #[test]
    fn test_slot_count_and_ordering() {
        let modulator = quiet_modulator(Profile::standard());
        // 16 bits over 4 FSK channels: 4 bits per stream = 4 slots.
        let bits = vec![true; 16];
        let samples = modulator.modulate(&bits);
        assert_eq!(samples.len(), 4 * modulator.samples_per_symbol());
    }

    #[test]
    fn test_qpsk_pads_to_symbol_multiple() {
        let modulator = quiet_modulator(Profile::fast());
        // 8 bits over 8 QPSK channels: one bit per stream, padded to one
        // dibit, so exactly one slot.
        let samples = modulator.modulate(&vec![true; 8]);
        assert_eq!(samples.len(), modulator.samples_per_symbol());
    }

    #[test]
    fn test_amplitude_bounded_by_power() {
        let modulator = quiet_modulator(Profile::standard());
        let samples = modulator.modulate(&vec![true; 64]);
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= modulator.power() + 1e-4);
        assert!(peak > 0.0);
    }

    #[test]
    fn test_symbolize_groups_msb_first() {
        let bits: Vec<bool> = [false, true, true, true].to_vec();
        assert_eq!(symbolize(&bits, 2), vec![0b01, 0b11]);
        // Tail padding with zeros.
        assert_eq!(symbolize(&[true], 2), vec![0b10]);
        assert_eq!(symbolize(&[true, false, true, true], 3), vec![0b101, 0b100]);
    }

    #[test]
    fn test_qpsk_phase_of_first_sample() {
        // cos(phase) at t = 0: symbol 01 (90 degrees) starts at zero,
        // symbol 11 (270 degrees) starts at zero, symbol 00 starts at one.
        let mut window = vec![0.0f32; 4];
        add_tone(&mut window, 5_000.0, PI / 2.0, 1.0);
        assert!(window[0].abs() < 1e-6);

        let mut window = vec![0.0f32; 4];
        add_tone(&mut window, 5_000.0, 3.0 * PI / 2.0, 1.0);
        assert!(window[0].abs() < 1e-6);

        let mut window = vec![0.0f32; 4];
        add_tone(&mut window, 5_000.0, 0.0, 1.0);
        assert!((window[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tone_matches_closed_form() {
        let mut window = vec![0.0f32; 32];
        add_tone(&mut window, 5_000.0, PI / 2.0, 1.0);
        for (n, &sample) in window.iter().enumerate() {
            let t = n as f32 / SAMPLE_RATE as f32;
            let expected = (TAU * 5_000.0 * t + PI / 2.0).cos();
            assert!((sample - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_preamble_shape() {
        let modulator = quiet_modulator(Profile::standard());
        let sps = modulator.samples_per_symbol();
        let preamble = modulator.preamble();
        let chord_len = round_to_slots(SAMPLE_RATE * PREAMBLE_CHORD_MS as usize / 1000, sps);
        let gap_len = round_to_slots(SAMPLE_RATE * PREAMBLE_GAP_MS as usize / 1000, sps);
        assert_eq!(preamble.len(), 3 * chord_len + 2 * gap_len);
        // Whole preamble sits on the slot grid.
        assert_eq!(preamble.len() % sps, 0);
        // The gap between the first two chords is silent.
        let gap = &preamble[chord_len..chord_len + gap_len];
        assert!(gap.iter().all(|&s| s == 0.0));
        // Chords carry energy.
        assert!(preamble[..chord_len].iter().any(|&s| s.abs() > 1e-3));
    }

    #[test]
    fn test_power_controller_deadband_and_steps() {
        let mut controller = PowerController::new(true);
        let start = controller.power();
        controller.report_snr(TARGET_SNR_DB + 1.5);
        assert_eq!(controller.power(), start);
        controller.report_snr(TARGET_SNR_DB - 5.0);
        assert!((controller.power() - start * 1.1).abs() < 1e-6);
        controller.report_snr(TARGET_SNR_DB + 5.0);
        assert!((controller.power() - start * 1.1 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_power_controller_clamps() {
        let mut controller = PowerController::new(true);
        for _ in 0..200 {
            controller.report_snr(TARGET_SNR_DB - 10.0);
        }
        assert!(controller.power() <= MAX_POWER);
        for _ in 0..400 {
            controller.report_snr(TARGET_SNR_DB + 10.0);
        }
        assert!(controller.power() >= MIN_POWER);
    }

    #[test]
    fn test_fixed_power_ignores_reports() {
        let mut controller = PowerController::new(false);
        controller.report_snr(-20.0);
        assert_eq!(controller.power(), DEFAULT_POWER);
    }
}
