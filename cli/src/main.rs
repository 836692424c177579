use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec};
use tracing_subscriber::EnvFilter;

use tonelink_core::{
    CalibrationKind, CalibrationResult, Calibrator, IntegrityStatus, MemorySink, ModulationScheme,
    Profile, ReceiverSession, SenderConfig, SenderSession, SpectrumAnalyzer, FFT_SIZE,
    SAMPLE_RATE, SPECTRUM_INTERVAL_MS,
};

#[derive(Parser)]
#[command(name = "tonelink")]
#[command(about = "File transfer over audible tones")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file into a playable WAV transmission
    Send {
        /// Input file to transmit
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Transfer profile: standard, fast, dense or turbo
        #[arg(short, long, default_value = "standard")]
        profile: String,

        /// Calibration preset JSON produced by `tonelink calibrate`
        #[arg(short, long)]
        calibration: Option<PathBuf>,

        /// Disable LZ77 compression
        #[arg(long)]
        no_compress: bool,
    },

    /// Decode a recorded WAV transmission back into the original file
    Recv {
        /// Input WAV recording
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Output file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Transfer profile; must match the sender
        #[arg(short, long, default_value = "standard")]
        profile: String,

        /// Calibration preset JSON; must match the sender's carriers
        #[arg(short, long)]
        calibration: Option<PathBuf>,
    },

    /// Build a calibration preset from an ambient-noise recording
    Calibrate {
        /// Input WAV of ambient room noise (a few seconds)
        #[arg(value_name = "AMBIENT.WAV")]
        input: PathBuf,

        /// Output preset JSON
        #[arg(value_name = "PRESET.JSON")]
        output: PathBuf,

        /// Transfer profile the preset is for
        #[arg(short, long, default_value = "standard")]
        profile: String,

        /// Use the full-length probe instead of the quick one
        #[arg(long)]
        full: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(true)
        .init();

    match Cli::parse().command {
        Commands::Send {
            input,
            output,
            profile,
            calibration,
            no_compress,
        } => send_command(&input, &output, &profile, calibration.as_deref(), no_compress),
        Commands::Recv {
            input,
            output,
            profile,
            calibration,
        } => recv_command(&input, &output, &profile, calibration.as_deref()),
        Commands::Calibrate {
            input,
            output,
            profile,
            full,
        } => calibrate_command(&input, &output, &profile, full),
    }
}

fn resolve_profile(name: &str) -> Result<Profile> {
    Profile::by_name(name).with_context(|| {
        format!(
            "unknown profile '{name}', expected one of: {}",
            Profile::preset_names().join(", ")
        )
    })
}

fn resolve_calibration(path: Option<&Path>, profile: &Profile) -> Result<CalibrationResult> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading calibration preset {}", path.display()))?;
            Ok(CalibrationResult::from_json(&json)?)
        }
        None => Ok(CalibrationResult::assume_quiet(profile)?),
    }
}

fn send_command(
    input: &Path,
    output: &Path,
    profile_name: &str,
    calibration: Option<&Path>,
    no_compress: bool,
) -> Result<()> {
    let profile = resolve_profile(profile_name)?;
    let calibration = resolve_calibration(calibration, &profile)?;

    let bytes =
        std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    println!("Read {} bytes from {}", bytes.len(), input.display());

    let config = SenderConfig {
        use_compression: !no_compress,
        ..SenderConfig::default()
    };
    let mut sender = SenderSession::new(profile, &calibration, config, MemorySink::default())?;
    let report = sender.send_file(&bytes, &filename)?;
    let samples = sender.into_sink().samples;
    println!(
        "Encoded {} chunk(s) ({} bytes on air{}) into {} samples",
        report.chunks,
        report.bytes_on_air,
        if report.compressed { ", compressed" } else { "" },
        samples.len()
    );

    write_wav(output, &samples)?;
    println!(
        "Wrote {:.1} s of audio to {}",
        samples.len() as f32 / SAMPLE_RATE as f32,
        output.display()
    );
    Ok(())
}

fn recv_command(
    input: &Path,
    output: &Path,
    profile_name: &str,
    calibration: Option<&Path>,
) -> Result<()> {
    let profile = resolve_profile(profile_name)?;
    let calibration = resolve_calibration(calibration, &profile)?;

    let samples = read_wav(input)?;
    println!("Read {} samples from {}", samples.len(), input.display());

    let mut receiver = ReceiverSession::new(profile.clone(), &calibration)?;
    if profile.scheme == ModulationScheme::Fsk {
        // Slice the recording into symbol slots and feed them as spectrum
        // ticks, one frame per slot with fresh smoothing.
        let mut analyzer = SpectrumAnalyzer::new();
        for window in samples.chunks(profile.samples_per_symbol()) {
            analyzer.reset();
            let frame = analyzer.analyze(window);
            receiver.push_spectrum(&frame)?;
        }
    } else {
        for block in samples.chunks(4_096) {
            receiver.push_samples(block)?;
        }
    }

    let outcome = match receiver.take_outcome() {
        Some(outcome) => outcome,
        None => bail!("no complete transfer found in the recording"),
    };
    if !outcome.missing_chunks.is_empty() {
        eprintln!(
            "Warning: {} chunk(s) missing: {:?}",
            outcome.missing_chunks.len(),
            outcome.missing_chunks
        );
    }
    let status = match outcome.integrity {
        IntegrityStatus::Verified => "verified",
        IntegrityStatus::Mismatch => "INTEGRITY MISMATCH",
    };

    std::fs::write(output, &outcome.data)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Recovered '{}': {} bytes ({status}) -> {}",
        outcome.metadata.filename,
        outcome.data.len(),
        output.display()
    );
    Ok(())
}

fn calibrate_command(input: &Path, output: &Path, profile_name: &str, full: bool) -> Result<()> {
    let profile = resolve_profile(profile_name)?;
    let kind = if full {
        CalibrationKind::Full
    } else {
        CalibrationKind::Quick
    };

    let samples = read_wav(input)?;
    let hop = SAMPLE_RATE * SPECTRUM_INTERVAL_MS as usize / 1000;
    let mut analyzer = SpectrumAnalyzer::new();
    let mut calibrator = Calibrator::new();
    let mut position = 0;
    while position < samples.len() && calibrator.frames_collected() < kind.frames() {
        let end = (position + FFT_SIZE).min(samples.len());
        calibrator.push_spectrum(&analyzer.analyze(&samples[position..end]));
        position += hop;
    }
    println!(
        "Probed {} spectrum frames ({} requested)",
        calibrator.frames_collected(),
        kind.frames()
    );

    let result = calibrator.finish(&profile)?;
    std::fs::write(output, result.to_json()?)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Selected carriers {:.0}-{:.0} Hz ({} channels) -> {}",
        result.carriers.first().copied().unwrap_or(0.0),
        result.carriers.last().copied().unwrap_or(0.0),
        result.carriers.len(),
        output.display()
    );
    Ok(())
}

fn write_wav(path: &Path, samples: &[f32]) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

fn read_wav(path: &Path) -> Result<Vec<f32>> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE as u32 {
        bail!(
            "{} is {} Hz; transmissions are fixed at {} Hz",
            path.display(),
            spec.sample_rate,
            SAMPLE_RATE
        );
    }

    let mut samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        (format, bits) => bail!("unsupported WAV format: {bits}-bit {format:?}"),
    };

    if spec.channels == 2 {
        samples = stereo_to_mono(&samples);
    } else if spec.channels != 1 {
        bail!("unsupported channel count: {}", spec.channels);
    }
    Ok(samples)
}

fn stereo_to_mono(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks_exact(2)
        .map(|pair| (pair[0] + pair[1]) / 2.0)
        .collect()
}
