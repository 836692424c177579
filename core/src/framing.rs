//! Bit-level framing: byte/bit conversion, the sync-delimited frame layout
//! and the round-robin channel interleave.
//!
//! One frame on the air is `10101010`, the packet body bytes MSB-first, one
//! NUL delimiter byte, then `01010101`. The delimiter is what the receive-side
//! synchronizer keys on to end a packet; the suffix separates frames and
//! keeps the hunter from locking onto trailing signal.

pub const SYNC_PREFIX: [bool; 8] = [true, false, true, false, true, false, true, false];
pub const SYNC_SUFFIX: [bool; 8] = [false, true, false, true, false, true, false, true];
pub const FRAME_DELIMITER: u8 = 0x00;

/// MSB-first bit expansion.
pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1 == 1);
        }
    }
    bits
}

/// Inverse of [`bytes_to_bits`]; trailing bits short of a full byte are
/// dropped.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |byte, &bit| byte << 1 | bit as u8))
        .collect()
}

/// Wrap a packet body into its on-air bit sequence.
pub fn build_frame(body: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(16 + (body.len() + 1) * 8);
    bits.extend_from_slice(&SYNC_PREFIX);
    bits.extend(bytes_to_bits(body));
    bits.extend(bytes_to_bits(&[FRAME_DELIMITER]));
    bits.extend_from_slice(&SYNC_SUFFIX);
    bits
}

/// Distribute bits round-robin across `num_channels` streams by position
/// (`i -> i mod num_channels`), right-padding shorter streams with zeros so
/// every stream has the same length.
pub fn interleave(bits: &[bool], num_channels: usize) -> Vec<Vec<bool>> {
    let per_stream = bits.len().div_ceil(num_channels);
    let mut streams: Vec<Vec<bool>> = (0..num_channels)
        .map(|_| Vec::with_capacity(per_stream))
        .collect();
    for (i, &bit) in bits.iter().enumerate() {
        streams[i % num_channels].push(bit);
    }
    for stream in &mut streams {
        stream.resize(per_stream, false);
    }
    streams
}

/// Reassemble the original bit order from equal-length channel streams:
/// output position `j` comes from stream `j % n` at offset `j / n`.
pub fn deinterleave(streams: &[Vec<bool>]) -> Vec<bool> {
    let n = streams.len();
    if n == 0 {
        return Vec::new();
    }
    let per_stream = streams.iter().map(Vec::len).max().unwrap_or(0);
    let mut bits = Vec::with_capacity(n * per_stream);
    for offset in 0..per_stream {
        for stream in streams {
            bits.push(stream.get(offset).copied().unwrap_or(false));
        }
    }
    bits
}
