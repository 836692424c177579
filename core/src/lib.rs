//! Acoustic file-transfer protocol stack
//!
//! Encodes arbitrary files as audible multi-carrier tones (FSK, QPSK or 8-PSK)
//! and decodes them back from microphone spectra. The stack is, bottom up:
//! environment calibration (noise probing and carrier selection), the
//! modulator and demodulator, bit-level framing with a sync preamble, a typed
//! `META`/`DATA`/`END` packet protocol, chunked file transfer with LZ77
//! compression and CRC-16 integrity, and one session type per direction.
//!
//! The core owns no audio devices: senders emit sample buffers into an
//! [`AudioSink`] and receivers consume host-delivered spectrum frames or raw
//! sample blocks.

pub mod calibration;
pub mod codec;
pub mod error;
pub mod event;
pub mod framing;
pub mod modem;
pub mod packet;
pub mod profile;
pub mod receiver;
pub mod sender;
pub mod spectrum;

pub use calibration::{CalibrationKind, CalibrationResult, Calibrator};
pub use error::{Result, ToneLinkError};
pub use event::SessionEvent;
pub use modem::demodulator::Demodulator;
pub use modem::modulator::Modulator;
pub use packet::{FileMetadata, Packet, PayloadEncoding};
pub use profile::{ModulationScheme, Profile};
pub use receiver::{IntegrityStatus, ReceiverSession, TransferOutcome};
pub use sender::{AudioSink, MemorySink, SendReport, SenderConfig, SenderSession};
pub use spectrum::{SpectrumAnalyzer, SpectrumFrame};

// Audio configuration. Normative: the spectrum bin layout follows directly
// from the sample rate and FFT size, so changing either invalidates every
// stored calibration.
pub const SAMPLE_RATE: usize = 44_100;
pub const FFT_SIZE: usize = 8_192;
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2; // 4096
pub const SPECTRUM_INTERVAL_MS: u64 = 50;
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.3;
pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

// Carrier placement
pub const FREQ_MIN_HZ: f32 = 2_000.0;
pub const FREQ_MAX_HZ: f32 = 10_000.0;
pub const CALIBRATION_STEP_HZ: f32 = 50.0;
pub const FSK_DEVIATION_HZ: f32 = 100.0;

// Signal detection threshold on the 0-255 byte magnitude scale
pub const SIGNAL_THRESHOLD: u8 = 80;

// Transmit power
pub const MIN_POWER: f32 = 0.02;
pub const MAX_POWER: f32 = 0.5;
pub const DEFAULT_POWER: f32 = 0.10;
pub const TARGET_SNR_DB: f32 = 15.0;

// Session timing
pub const PREAMBLE_CHORDS: usize = 3;
pub const PREAMBLE_CHORD_MS: u64 = 150;
pub const PREAMBLE_GAP_MS: u64 = 50;
pub const PACKET_DELAY_MS: u64 = 10;
pub const END_REPEAT_GAP_MS: u64 = 100;
pub const MAX_RETRIES: u32 = 3;
/// Reserved for a future bidirectional ACK channel; unused by the one-way
/// protocol revision.
pub const ACK_TIMEOUT_MS: u64 = 1_000;

// Packet limits
pub const MAX_CHUNK_INDEX: u32 = 1 << 24;
