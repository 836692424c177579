//! Frame synchronizer: the Hunting/Framed state machine that turns the
//! demodulated bit stream into delimited packet bodies.

use tracing::{debug, warn};

use crate::framing::{FRAME_DELIMITER, SYNC_PREFIX};

/// Hunting keeps at most this many bits before trimming.
const HUNT_BUF_LIMIT: usize = 1_000;
/// Bits retained after a trim; enough to hold a sync pattern split across
/// the trim point.
const HUNT_BUF_KEEP: usize = 100;
/// Framed packet buffer cap; anything longer is a missed delimiter.
const PACKET_BUF_LIMIT: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// Scanning the bit stream for the `10101010` sync pattern.
    Hunting,
    /// Consuming bytes into the packet buffer until the NUL delimiter.
    Framed,
}

pub struct FrameSync {
    state: SyncState,
    bits: Vec<bool>,
    packet_buf: Vec<u8>,
}

impl FrameSync {
    pub fn new() -> Self {
        Self {
            state: SyncState::Hunting,
            bits: Vec::new(),
            packet_buf: Vec::new(),
        }
    }

    /// Feed demodulated bits; returns any packet bodies completed by them.
    /// The synchronizer never fails: garbage resets it to hunting.
    pub fn push_bits(&mut self, incoming: &[bool]) -> Vec<Vec<u8>> {
        self.bits.extend_from_slice(incoming);
        let mut delivered = Vec::new();

        loop {
            match self.state {
                SyncState::Hunting => {
                    if let Some(pos) = find_pattern(&self.bits, &SYNC_PREFIX) {
                        self.bits.drain(..pos + SYNC_PREFIX.len());
                        self.packet_buf.clear();
                        self.state = SyncState::Framed;
                        debug!("sync pattern acquired");
                    } else {
                        if self.bits.len() > HUNT_BUF_LIMIT {
                            let cut = self.bits.len() - HUNT_BUF_KEEP;
                            self.bits.drain(..cut);
                        }
                        break;
                    }
                }
                SyncState::Framed => {
                    if self.bits.len() < 8 {
                        break;
                    }
                    let byte = self
                        .bits
                        .drain(..8)
                        .fold(0u8, |acc, bit| acc << 1 | bit as u8);
                    if byte == FRAME_DELIMITER {
                        if !self.packet_buf.is_empty() {
                            delivered.push(std::mem::take(&mut self.packet_buf));
                        }
                        self.state = SyncState::Hunting;
                    } else {
                        self.packet_buf.push(byte);
                        if self.packet_buf.len() > PACKET_BUF_LIMIT {
                            warn!(
                                len = self.packet_buf.len(),
                                "packet buffer overflow, resynchronizing"
                            );
                            self.packet_buf.clear();
                            self.state = SyncState::Hunting;
                        }
                    }
                }
            }
        }

        delivered
    }

    /// Drop all buffered state and return to hunting.
    pub fn reset(&mut self) {
        self.state = SyncState::Hunting;
        self.bits.clear();
        self.packet_buf.clear();
    }
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

fn find_pattern(bits: &[bool], pattern: &[bool]) -> Option<usize> {
    if bits.len() < pattern.len() {
        return None;
    }
    bits.windows(pattern.len()).position(|w| w == pattern)
}
