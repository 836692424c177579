//! Sender session: file bytes to an ordered stream of audio buffers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::calibration::CalibrationResult;
use crate::codec;
use crate::error::{Result, ToneLinkError};
use crate::event::{emit, SessionEvent};
use crate::framing;
use crate::modem::modulator::Modulator;
use crate::packet::{FileMetadata, Packet};
use crate::profile::Profile;
use crate::{END_REPEAT_GAP_MS, MAX_RETRIES, PACKET_DELAY_MS, SAMPLE_RATE};

/// Host speaker output. The host is expected to play buffers back-to-back in
/// the order they arrive; the session never reorders or overlaps them.
pub trait AudioSink {
    fn play_samples(&mut self, samples: &[f32], sample_rate: u32);
}

/// Collects everything played into one buffer. Used by the CLI to render a
/// transmission to WAV and by tests to loop it back into a receiver.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub samples: Vec<f32>,
}

impl AudioSink for MemorySink {
    fn play_samples(&mut self, samples: &[f32], _sample_rate: u32) {
        self.samples.extend_from_slice(samples);
    }
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub use_compression: bool,
    /// Inputs at or below this size are never compressed.
    pub compression_min_size: usize,
    pub max_retries: u32,
    pub packet_delay_ms: u64,
    pub adaptive_power: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            use_compression: true,
            compression_min_size: 64,
            max_retries: MAX_RETRIES,
            packet_delay_ms: PACKET_DELAY_MS,
            adaptive_power: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendReport {
    pub chunks: u32,
    pub failed_chunks: Vec<u32>,
    pub compressed: bool,
    pub bytes_on_air: usize,
    pub samples_emitted: usize,
}

pub struct SenderSession<S: AudioSink> {
    profile: Profile,
    config: SenderConfig,
    modulator: Modulator,
    sink: S,
    events: Option<Sender<SessionEvent>>,
    stop: Arc<AtomicBool>,
    emitted: usize,
}

impl<S: AudioSink> SenderSession<S> {
    pub fn new(
        profile: Profile,
        calibration: &CalibrationResult,
        config: SenderConfig,
        sink: S,
    ) -> Result<Self> {
        let modulator = Modulator::new(profile.clone(), calibration, config.adaptive_power)?;
        Ok(Self {
            profile,
            config,
            modulator,
            sink,
            events: None,
            stop: Arc::new(AtomicBool::new(false)),
            emitted: 0,
        })
    }

    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Flag checked between chunks; setting it cancels the transfer at the
    /// next packet boundary, never mid-slot.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Feed back the peer's reported reception SNR to the power controller.
    pub fn report_snr(&mut self, snr_db: f32) {
        self.modulator.report_snr(snr_db);
    }

    /// Recover the sink (and its collected samples) after a send.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Transmit one file: preamble, `META`, one `DATA` per chunk with pacing
    /// gaps, a single re-attempt pass over failed chunks, then `END` twice.
    pub fn send_file(&mut self, bytes: &[u8], filename: &str) -> Result<SendReport> {
        let (stream, compressed) = self.prepare_payload(bytes);
        let checksum = codec::checksum16(&stream);
        let crc = codec::crc16(&stream);
        let chunk_size = self.profile.chunk_size;
        let chunks = stream.len().div_ceil(chunk_size) as u32;
        let encoding = self.profile.payload_encoding();

        let metadata = FileMetadata {
            filename: filename.to_string(),
            size: stream.len() as u64,
            original_size: bytes.len() as u64,
            compressed,
            checksum,
            crc,
            chunks,
            timestamp: unix_now(),
            encoding,
        };
        info!(
            filename,
            original = bytes.len(),
            on_air = stream.len(),
            chunks,
            compressed,
            profile = %self.profile.name,
            "starting transfer"
        );

        self.play_preamble();
        self.send_packet(&Packet::Meta(metadata))?;
        self.pace();

        let mut failed = Vec::new();
        for (index, chunk) in stream.chunks(chunk_size).enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                return Err(ToneLinkError::Canceled);
            }
            let index = index as u32;
            let packet = Packet::Data {
                index,
                payload: encoding.encode(chunk),
            };
            if self.send_with_retries(&packet)? {
                emit(&self.events, SessionEvent::ChunkSent { index, total: chunks });
            } else {
                failed.push(index);
            }
            self.pace();
        }

        // One re-attempt pass over anything the retry loop gave up on.
        let mut still_failed = Vec::new();
        for &index in &failed {
            if self.stop.load(Ordering::Relaxed) {
                return Err(ToneLinkError::Canceled);
            }
            let start = index as usize * chunk_size;
            let end = (start + chunk_size).min(stream.len());
            let packet = Packet::Data {
                index,
                payload: encoding.encode(&stream[start..end]),
            };
            if self.send_with_retries(&packet)? {
                emit(&self.events, SessionEvent::ChunkSent { index, total: chunks });
            } else {
                still_failed.push(index);
            }
            self.pace();
        }

        let end_packet = Packet::End {
            reason: "COMPLETE".to_string(),
        };
        self.send_packet(&end_packet)?;
        self.play_silence_ms(END_REPEAT_GAP_MS);
        self.send_packet(&end_packet)?;

        info!(samples = self.emitted, "transfer played out");
        Ok(SendReport {
            chunks,
            failed_chunks: still_failed,
            compressed,
            bytes_on_air: stream.len(),
            samples_emitted: self.emitted,
        })
    }

    fn prepare_payload(&self, bytes: &[u8]) -> (Vec<u8>, bool) {
        if self.config.use_compression && bytes.len() > self.config.compression_min_size {
            let compressed = codec::compress(bytes);
            if compressed.len() < bytes.len() {
                debug!(
                    from = bytes.len(),
                    to = compressed.len(),
                    "compression accepted"
                );
                return (compressed, true);
            }
        }
        (bytes.to_vec(), false)
    }

    /// Transmit with the retry scaffold. The current protocol revision is
    /// one-way: `send_packet_with_ack` reports success unconditionally, so
    /// the loop runs once; the structure exists for a future ACK listener.
    fn send_with_retries(&mut self, packet: &Packet) -> Result<bool> {
        for _attempt in 0..self.config.max_retries.max(1) {
            if self.send_packet_with_ack(packet)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn send_packet_with_ack(&mut self, packet: &Packet) -> Result<bool> {
        self.send_packet(packet)?;
        Ok(true)
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let body = packet.serialize()?;
        let samples = self.modulator.modulate(&framing::build_frame(&body));
        self.align_to_slot();
        self.play(&samples);
        Ok(())
    }

    fn play_preamble(&mut self) {
        let preamble = self.modulator.preamble();
        self.play(&preamble);
        self.align_to_slot();
    }

    fn pace(&mut self) {
        self.play_silence_ms(self.config.packet_delay_ms);
    }

    fn play_silence_ms(&mut self, ms: u64) {
        let len = SAMPLE_RATE * ms as usize / 1000;
        self.play(&vec![0.0; len]);
        self.align_to_slot();
    }

    /// Pad with silence so the next buffer starts on a symbol-slot boundary;
    /// receivers slice the stream into whole slots from the first sample.
    fn align_to_slot(&mut self) {
        let sps = self.modulator.samples_per_symbol();
        let rem = self.emitted % sps;
        if rem != 0 {
            self.play(&vec![0.0; sps - rem]);
        }
    }

    fn play(&mut self, samples: &[f32]) {
        self.sink.play_samples(samples, SAMPLE_RATE as u32);
        self.emitted += samples.len();
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
