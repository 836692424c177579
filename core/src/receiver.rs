//! Receiver session: spectrum ticks or sample blocks in, a reassembled file
//! out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::calibration::CalibrationResult;
use crate::codec;
use crate::error::Result;
use crate::event::{emit, SessionEvent};
use crate::modem::demodulator::Demodulator;
use crate::packet::{FileMetadata, Packet};
use crate::profile::Profile;
use crate::spectrum::SpectrumFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Checksum, CRC and decompressed size all match the metadata.
    Verified,
    /// The artifact was still delivered, but at least one check failed.
    Mismatch,
}

/// Final artifact of a transfer. Delivered even on integrity mismatch; only
/// cancellation or a corrupt compressed stream withholds it.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub data: Vec<u8>,
    pub metadata: FileMetadata,
    pub integrity: IntegrityStatus,
    pub missing_chunks: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    WaitingMeta,
    Receiving,
    Done,
}

pub struct ReceiverSession {
    demod: Demodulator,
    state: ReceiverState,
    metadata: Option<FileMetadata>,
    chunks: HashMap<u32, Vec<u8>>,
    bytes_received: usize,
    started: Instant,
    outcome: Option<TransferOutcome>,
    events: Option<Sender<SessionEvent>>,
    stop: Arc<AtomicBool>,
}

impl ReceiverSession {
    pub fn new(profile: Profile, calibration: &CalibrationResult) -> Result<Self> {
        Ok(Self {
            demod: Demodulator::new(profile, calibration)?,
            state: ReceiverState::WaitingMeta,
            metadata: None,
            chunks: HashMap::new(),
            bytes_received: 0,
            started: Instant::now(),
            outcome: None,
            events: None,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_events(mut self, events: Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Flag checked between ticks; once set, further input is ignored and no
    /// partial artifact is ever surfaced.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_done(&self) -> bool {
        self.state == ReceiverState::Done
    }

    pub fn outcome(&self) -> Option<&TransferOutcome> {
        self.outcome.as_ref()
    }

    pub fn take_outcome(&mut self) -> Option<TransferOutcome> {
        self.outcome.take()
    }

    pub fn last_snr_db(&self) -> Option<f32> {
        self.demod.last_snr_db()
    }

    /// Decoded payload bytes per second since the session started.
    pub fn transfer_rate(&self) -> f32 {
        let elapsed = self.started.elapsed().as_secs_f32();
        if elapsed > 0.0 {
            self.bytes_received as f32 / elapsed
        } else {
            0.0
        }
    }

    /// One host spectrum tick (FSK profiles).
    pub fn push_spectrum(&mut self, frame: &SpectrumFrame) -> Result<()> {
        if self.halted() {
            return Ok(());
        }
        for packet in self.demod.push_spectrum(frame)? {
            self.handle_packet(packet);
        }
        Ok(())
    }

    /// Raw PCM ingress (any profile).
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<()> {
        if self.halted() {
            return Ok(());
        }
        for packet in self.demod.push_samples(samples)? {
            self.handle_packet(packet);
        }
        Ok(())
    }

    /// Abandon the session; any partially collected transfer is discarded.
    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.state != ReceiverState::Done {
            info!("receive session canceled");
            self.state = ReceiverState::Done;
            self.chunks.clear();
            self.metadata = None;
        }
    }

    fn halted(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.state == ReceiverState::Done
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Meta(metadata) => self.handle_meta(metadata),
            Packet::Data { index, payload } => self.handle_data(index, &payload),
            Packet::End { reason } => self.handle_end(&reason),
        }
    }

    fn handle_meta(&mut self, metadata: FileMetadata) {
        match self.state {
            ReceiverState::WaitingMeta => {
                info!(
                    filename = %metadata.filename,
                    size = metadata.size,
                    chunks = metadata.chunks,
                    compressed = metadata.compressed,
                    "transfer announced"
                );
                self.metadata = Some(metadata);
                self.state = ReceiverState::Receiving;
            }
            _ => debug!("duplicate META ignored"),
        }
    }

    fn handle_data(&mut self, index: u32, payload: &str) {
        if self.state != ReceiverState::Receiving {
            warn!(index, "DATA before META dropped");
            return;
        }
        let (expected, encoding) = match &self.metadata {
            Some(metadata) => (metadata.chunks, metadata.encoding),
            None => return,
        };
        if index >= expected {
            warn!(index, expected, "chunk index out of range");
            return;
        }
        if self.chunks.contains_key(&index) {
            debug!(index, "duplicate chunk ignored");
            return;
        }
        let decoded = match encoding.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(index, error = %e, "undecodable chunk payload dropped");
                return;
            }
        };
        self.bytes_received += decoded.len();
        self.chunks.insert(index, decoded);
        debug!(
            index,
            received = self.chunks.len(),
            expected,
            rate = self.transfer_rate(),
            "chunk stored"
        );
        emit(&self.events, SessionEvent::ChunkReceived { index });
    }

    fn handle_end(&mut self, reason: &str) {
        let metadata = match self.metadata.take() {
            Some(metadata) => metadata,
            None => {
                warn!(reason, "END without a transfer in progress");
                return;
            }
        };
        if self.chunks.is_empty() && metadata.chunks > 0 {
            // Nothing arrived; keep waiting in case this END was stray.
            self.metadata = Some(metadata);
            return;
        }
        debug!(reason, "transfer end marker");
        self.reassemble(metadata);
        self.state = ReceiverState::Done;
    }

    fn reassemble(&mut self, metadata: FileMetadata) {
        let mut assembled = Vec::with_capacity(metadata.size as usize);
        let mut missing = Vec::new();
        for index in 0..metadata.chunks {
            match self.chunks.get(&index) {
                Some(chunk) => assembled.extend_from_slice(chunk),
                None => {
                    warn!(index, "chunk missing at reassembly");
                    missing.push(index);
                }
            }
        }

        let checksum = codec::checksum16(&assembled);
        let crc = codec::crc16(&assembled);
        let mut integrity = if checksum == metadata.checksum && crc == metadata.crc {
            IntegrityStatus::Verified
        } else {
            IntegrityStatus::Mismatch
        };

        let data = if metadata.compressed {
            match codec::decompress(&assembled) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "decompression failed, discarding transfer");
                    emit(
                        &self.events,
                        SessionEvent::Error {
                            kind: "corrupt_stream".to_string(),
                            message: e.to_string(),
                        },
                    );
                    return;
                }
            }
        } else {
            assembled
        };
        if data.len() as u64 != metadata.original_size {
            integrity = IntegrityStatus::Mismatch;
        }

        info!(
            filename = %metadata.filename,
            bytes = data.len(),
            missing = missing.len(),
            verified = integrity == IntegrityStatus::Verified,
            "transfer reassembled"
        );
        emit(
            &self.events,
            SessionEvent::TransferDone {
                metadata: metadata.clone(),
                integrity,
            },
        );
        self.outcome = Some(TransferOutcome {
            data,
            metadata,
            integrity,
            missing_chunks: missing,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PayloadEncoding;

    fn metadata_for(stream: &[u8], chunks: u32) -> FileMetadata {
        FileMetadata {
            filename: "t.bin".to_string(),
            size: stream.len() as u64,
            original_size: stream.len() as u64,
            compressed: false,
            checksum: codec::checksum16(stream),
            crc: codec::crc16(stream),
            chunks,
            timestamp: 0,
            encoding: PayloadEncoding::Base64,
        }
    }

    fn fresh_session() -> ReceiverSession {
        let profile = Profile::standard();
        let calibration = CalibrationResult::assume_quiet(&profile).unwrap();
        ReceiverSession::new(profile, &calibration).unwrap()
    }

    fn data_packet(index: u32, chunk: &[u8]) -> Packet {
        Packet::Data {
            index,
            payload: PayloadEncoding::Base64.encode(chunk),
        }
    }

    #[test]
    fn test_packet_sequence_reassembles() {
        let mut session = fresh_session();
        let stream = b"hello receiver";
        session.handle_packet(Packet::Meta(metadata_for(stream, 2)));
        session.handle_packet(data_packet(0, &stream[..7]));
        session.handle_packet(data_packet(1, &stream[7..]));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        let outcome = session.take_outcome().unwrap();
        assert_eq!(outcome.data, stream);
        assert_eq!(outcome.integrity, IntegrityStatus::Verified);
        assert!(outcome.missing_chunks.is_empty());
        assert!(session.is_done());
    }

    #[test]
    fn test_duplicate_chunk_first_wins() {
        let mut session = fresh_session();
        let stream = b"ABCD";
        session.handle_packet(Packet::Meta(metadata_for(stream, 1)));
        session.handle_packet(data_packet(0, stream));
        // Second arrival with different content must be ignored.
        session.handle_packet(data_packet(0, b"ZZZZ"));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        let outcome = session.take_outcome().unwrap();
        assert_eq!(outcome.data, stream);
        assert_eq!(outcome.integrity, IntegrityStatus::Verified);
    }

    #[test]
    fn test_missing_chunk_yields_mismatch() {
        let mut session = fresh_session();
        let stream = b"0123456789";
        session.handle_packet(Packet::Meta(metadata_for(stream, 2)));
        session.handle_packet(data_packet(1, &stream[5..]));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        let outcome = session.take_outcome().unwrap();
        assert_eq!(outcome.missing_chunks, vec![0]);
        assert_eq!(outcome.integrity, IntegrityStatus::Mismatch);
        assert_eq!(outcome.data, &stream[5..]);
    }

    #[test]
    fn test_data_before_meta_dropped() {
        let mut session = fresh_session();
        session.handle_packet(data_packet(0, b"early"));
        let stream = b"on time";
        session.handle_packet(Packet::Meta(metadata_for(stream, 1)));
        session.handle_packet(data_packet(0, stream));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        assert_eq!(session.take_outcome().unwrap().data, stream);
    }

    #[test]
    fn test_empty_transfer() {
        let mut session = fresh_session();
        session.handle_packet(Packet::Meta(metadata_for(&[], 0)));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        let outcome = session.take_outcome().unwrap();
        assert!(outcome.data.is_empty());
        assert_eq!(outcome.integrity, IntegrityStatus::Verified);
    }

    #[test]
    fn test_end_without_chunks_keeps_waiting() {
        let mut session = fresh_session();
        let stream = b"late data";
        session.handle_packet(Packet::Meta(metadata_for(stream, 1)));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        assert!(!session.is_done());
        session.handle_packet(data_packet(0, stream));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        assert_eq!(session.take_outcome().unwrap().data, stream);
    }

    #[test]
    fn test_compressed_transfer_round_trip() {
        let mut session = fresh_session();
        let original = vec![b'Q'; 500];
        let stream = codec::compress(&original);
        let mut metadata = metadata_for(&stream, 1);
        metadata.compressed = true;
        metadata.original_size = original.len() as u64;
        session.handle_packet(Packet::Meta(metadata));
        session.handle_packet(data_packet(0, &stream));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        let outcome = session.take_outcome().unwrap();
        assert_eq!(outcome.data, original);
        assert_eq!(outcome.integrity, IntegrityStatus::Verified);
    }

    #[test]
    fn test_corrupt_compressed_stream_withholds_artifact() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut session = fresh_session().with_events(tx);
        // Valid-looking header but a back-reference into nowhere.
        let stream = vec![0, 0, 0, 4, 0xFF, 0x00, 0x09, 0x03];
        let mut metadata = metadata_for(&stream, 1);
        metadata.compressed = true;
        metadata.original_size = 4;
        session.handle_packet(Packet::Meta(metadata));
        session.handle_packet(data_packet(0, &stream));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        assert!(session.take_outcome().is_none());
        assert!(session.is_done());
        let saw_error = rx.try_iter().any(|event| {
            matches!(event, SessionEvent::Error { ref kind, .. } if kind == "corrupt_stream")
        });
        assert!(saw_error);
    }

    #[test]
    fn test_cancel_discards_progress() {
        let mut session = fresh_session();
        let stream = b"will be discarded";
        session.handle_packet(Packet::Meta(metadata_for(stream, 1)));
        session.handle_packet(data_packet(0, stream));
        session.cancel();
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        assert!(session.take_outcome().is_none());
        assert!(session.is_done());
    }

    #[test]
    fn test_out_of_range_chunk_dropped() {
        let mut session = fresh_session();
        let stream = b"bounded";
        session.handle_packet(Packet::Meta(metadata_for(stream, 1)));
        session.handle_packet(data_packet(9, b"stray"));
        session.handle_packet(data_packet(0, stream));
        session.handle_packet(Packet::End {
            reason: "COMPLETE".to_string(),
        });
        let outcome = session.take_outcome().unwrap();
        assert_eq!(outcome.data, stream);
        assert_eq!(outcome.integrity, IntegrityStatus::Verified);
    }
}
