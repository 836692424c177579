//! Environment calibration: probe the ambient spectrum and place the carrier
//! comb where the noise floor is lowest.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ToneLinkError};
use crate::profile::Profile;
use crate::spectrum::{freq_to_bin, SpectrumFrame};
use crate::{CALIBRATION_STEP_HZ, FREQ_MAX_HZ, FREQ_MIN_HZ, SPECTRUM_BINS, SPECTRUM_INTERVAL_MS};

/// Probe length. Quick runs during receiver startup; full is for explicit
/// recalibration from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationKind {
    Quick,
    Full,
}

impl CalibrationKind {
    pub fn duration_ms(&self) -> u64 {
        match self {
            CalibrationKind::Quick => 2_000,
            CalibrationKind::Full => 3_000,
        }
    }

    /// Number of ~50 ms spectrum ticks the probe should consume.
    pub fn frames(&self) -> usize {
        (self.duration_ms() / SPECTRUM_INTERVAL_MS) as usize
    }
}

/// Output of a calibration probe: the selected carrier frequencies (ascending,
/// contiguous at the profile's channel spacing) and the per-bin noise floor
/// they were chosen against. Replaced wholesale on recalibration; hosts may
/// persist it through the JSON helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub carriers: Vec<f32>,
    pub noise_floor: Vec<f32>,
}

impl CalibrationResult {
    /// Band plan for a host with no probe data: carriers packed at the bottom
    /// of the search range over an assumed-silent floor.
    pub fn assume_quiet(profile: &Profile) -> Result<Self> {
        check_band_fits(profile)?;
        let carriers = comb(FREQ_MIN_HZ, profile);
        Ok(Self {
            carriers,
            noise_floor: vec![0.0; SPECTRUM_BINS],
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ToneLinkError::InvalidConfig(format!("calibration encode: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let result: Self = serde_json::from_str(json)
            .map_err(|e| ToneLinkError::InvalidConfig(format!("calibration decode: {e}")))?;
        if result.noise_floor.len() != SPECTRUM_BINS {
            return Err(ToneLinkError::InvalidConfig(format!(
                "calibration noise floor must have {} bins",
                SPECTRUM_BINS
            )));
        }
        Ok(result)
    }
}

/// Accumulates probe spectra pushed by the host, then selects the carrier
/// comb with the lowest mean noise across its bins.
pub struct Calibrator {
    sums: Vec<f64>,
    frames: usize,
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            sums: vec![0.0; SPECTRUM_BINS],
            frames: 0,
        }
    }

    pub fn push_spectrum(&mut self, frame: &SpectrumFrame) {
        for (sum, &magnitude) in self.sums.iter_mut().zip(frame.bins()) {
            *sum += magnitude as f64;
        }
        self.frames += 1;
    }

    pub fn frames_collected(&self) -> usize {
        self.frames
    }

    /// Scan candidate base frequencies in 50 Hz steps and pick the comb with
    /// the lowest mean noise; ties go to the lower base frequency.
    pub fn finish(&self, profile: &Profile) -> Result<CalibrationResult> {
        if self.frames == 0 {
            return Err(ToneLinkError::InsufficientData);
        }
        check_band_fits(profile)?;

        let noise_floor: Vec<f32> = self
            .sums
            .iter()
            .map(|sum| (*sum / self.frames as f64) as f32)
            .collect();

        let span = profile.band_span_hz();
        let mut best: Option<(f32, f32)> = None;
        let mut base = FREQ_MIN_HZ;
        while base + span <= FREQ_MAX_HZ {
            let mean = (0..profile.num_channels)
                .map(|i| {
                    let freq = base + i as f32 * profile.channel_spacing_hz as f32;
                    noise_floor[freq_to_bin(freq)]
                })
                .sum::<f32>()
                / profile.num_channels as f32;
            if best.map_or(true, |(_, score)| mean < score) {
                best = Some((base, mean));
            }
            base += CALIBRATION_STEP_HZ;
        }

        let (base, score) = best.ok_or(ToneLinkError::NoViableBand {
            channels: profile.num_channels,
            spacing_hz: profile.channel_spacing_hz,
        })?;
        info!(
            base_hz = base,
            mean_noise = score,
            channels = profile.num_channels,
            "calibration selected carrier comb"
        );
        Ok(CalibrationResult {
            carriers: comb(base, profile),
            noise_floor,
        })
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a complete probe over pre-collected frames.
pub fn calibrate_frames(frames: &[SpectrumFrame], profile: &Profile) -> Result<CalibrationResult> {
    let mut calibrator = Calibrator::new();
    for frame in frames {
        calibrator.push_spectrum(frame);
    }
    calibrator.finish(profile)
}

fn comb(base: f32, profile: &Profile) -> Vec<f32> {
    (0..profile.num_channels)
        .map(|i| base + i as f32 * profile.channel_spacing_hz as f32)
        .collect()
}

fn check_band_fits(profile: &Profile) -> Result<()> {
    if FREQ_MIN_HZ + profile.band_span_hz() > FREQ_MAX_HZ {
        return Err(ToneLinkError::NoViableBand {
            channels: profile.num_channels,
            spacing_hz: profile.channel_spacing_hz,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ModulationScheme;
    use crate::spectrum::bin_to_freq;

    fn flat_frame(level: u8) -> SpectrumFrame {
        SpectrumFrame::new(vec![level; SPECTRUM_BINS]).unwrap()
    }

    fn frame_with_quiet_band(level: u8, quiet_from_hz: f32, quiet_to_hz: f32) -> SpectrumFrame {
        let bins = (0..SPECTRUM_BINS)
            .map(|i| {
                let freq = bin_to_freq(i);
                if freq >= quiet_from_hz && freq <= quiet_to_hz {
                    0
                } else {
                    level
                }
            })
            .collect();
        SpectrumFrame::new(bins).unwrap()
    }

    #[test]
    fn test_no_frames_is_an_error() {
        let calibrator = Calibrator::new();
        assert!(matches!(
            calibrator.finish(&Profile::standard()),
            Err(ToneLinkError::InsufficientData)
        ));
    }

    #[test]
    fn test_flat_noise_picks_lowest_base() {
        let profile = Profile::standard();
        let result = calibrate_frames(&[flat_frame(40), flat_frame(40)], &profile).unwrap();
        assert_eq!(result.carriers.len(), 4);
        assert!((result.carriers[0] - FREQ_MIN_HZ).abs() < f32::EPSILON);
    }

    #[test]
    fn test_quiet_band_attracts_carriers() {
        let profile = Profile::standard();
        let frames = vec![frame_with_quiet_band(120, 6_000.0, 8_000.0); 3];
        let result = calibrate_frames(&frames, &profile).unwrap();
        let base = result.carriers[0];
        assert!(base >= 6_000.0, "base {base} should sit in the quiet band");
        assert!(base + profile.band_span_hz() <= 8_000.0);
    }

    #[test]
    fn test_carriers_ascending_and_contiguous() {
        let profile = Profile::fast();
        let result = calibrate_frames(&[flat_frame(10)], &profile).unwrap();
        for pair in result.carriers.windows(2) {
            let step = pair[1] - pair[0];
            assert!((step - profile.channel_spacing_hz as f32).abs() < 1e-3);
        }
    }

    #[test]
    fn test_oversized_comb_has_no_viable_band() {
        // 16 channels at 600 Hz spacing span 9 kHz, more than the 8 kHz range.
        let profile =
            Profile::new("wide", 16, 600, 20, ModulationScheme::Fsk, false, 64).unwrap();
        let err = calibrate_frames(&[flat_frame(0)], &profile).unwrap_err();
        assert!(matches!(err, ToneLinkError::NoViableBand { .. }));
        assert!(matches!(
            CalibrationResult::assume_quiet(&profile),
            Err(ToneLinkError::NoViableBand { .. })
        ));
    }

    #[test]
    fn test_every_carrier_inside_search_range() {
        let profile = Profile::turbo();
        let result = calibrate_frames(&[flat_frame(5)], &profile).unwrap();
        for &carrier in &result.carriers {
            assert!((FREQ_MIN_HZ..=FREQ_MAX_HZ).contains(&carrier));
        }
    }

    #[test]
    fn test_json_round_trip() {
        let profile = Profile::standard();
        let result = CalibrationResult::assume_quiet(&profile).unwrap();
        let json = result.to_json().unwrap();
        let restored = CalibrationResult::from_json(&json).unwrap();
        assert_eq!(result, restored);
    }

    #[test]
    fn test_probe_frame_counts() {
        assert_eq!(CalibrationKind::Quick.frames(), 40);
        assert_eq!(CalibrationKind::Full.frames(), 60);
    }
}
