use serde::{Deserialize, Serialize};

use crate::error::{Result, ToneLinkError};
use crate::packet::PayloadEncoding;
use crate::SAMPLE_RATE;

/// Modulation order of one channel. FSK shifts the carrier frequency, the PSK
/// variants shift its phase; higher orders carry more bits per symbol slot at
/// the cost of noise margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationScheme {
    Fsk,
    Qpsk,
    Psk8,
}

impl ModulationScheme {
    pub fn bits_per_symbol(&self) -> usize {
        match self {
            ModulationScheme::Fsk => 1,
            ModulationScheme::Qpsk => 2,
            ModulationScheme::Psk8 => 3,
        }
    }

    /// Number of constellation points for the PSK schemes (2 for FSK, where
    /// the two points are frequencies rather than phases).
    pub fn states(&self) -> usize {
        1 << self.bits_per_symbol()
    }

    /// Carrier phase offset in radians for a symbol value, counting
    /// counter-clockwise from 0 in equal steps (QPSK: 90 degrees,
    /// 8-PSK: 45 degrees).
    pub fn phase_for_symbol(&self, value: u8) -> f32 {
        value as f32 * std::f32::consts::TAU / self.states() as f32
    }
}

/// Physical-layer parameter set shared by both ends of a transfer. Immutable
/// once built; sender and receiver must be constructed from the same profile
/// or decoding fails silently (there is no in-band negotiation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub num_channels: usize,
    pub channel_spacing_hz: u32,
    pub symbol_duration_ms: u32,
    pub scheme: ModulationScheme,
    pub use_binary_payload: bool,
    pub chunk_size: usize,
}

impl Profile {
    pub fn new(
        name: &str,
        num_channels: usize,
        channel_spacing_hz: u32,
        symbol_duration_ms: u32,
        scheme: ModulationScheme,
        use_binary_payload: bool,
        chunk_size: usize,
    ) -> Result<Self> {
        if ![4, 8, 12, 16].contains(&num_channels) {
            return Err(ToneLinkError::InvalidConfig(
                "num_channels must be 4, 8, 12 or 16".to_string(),
            ));
        }
        if channel_spacing_hz == 0 || symbol_duration_ms == 0 || chunk_size == 0 {
            return Err(ToneLinkError::InvalidConfig(
                "channel spacing, symbol duration and chunk size must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            num_channels,
            channel_spacing_hz,
            symbol_duration_ms,
            scheme,
            use_binary_payload,
            chunk_size,
        })
    }

    /// Robust default: few channels, wide spacing, FSK, Base64 payloads.
    pub fn standard() -> Self {
        Self::preset("standard", 4, 300, ModulationScheme::Fsk, false, 64)
    }

    /// Higher throughput: QPSK over eight channels with raw binary payloads.
    pub fn fast() -> Self {
        Self::preset("fast", 8, 250, ModulationScheme::Qpsk, true, 128)
    }

    /// QPSK over twelve channels, Base64 payloads for hostile byte streams.
    pub fn dense() -> Self {
        Self::preset("dense", 12, 250, ModulationScheme::Qpsk, false, 128)
    }

    /// Maximum throughput: 8-PSK over sixteen channels.
    pub fn turbo() -> Self {
        Self::preset("turbo", 16, 250, ModulationScheme::Psk8, true, 128)
    }

    fn preset(
        name: &str,
        num_channels: usize,
        channel_spacing_hz: u32,
        scheme: ModulationScheme,
        use_binary_payload: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            num_channels,
            channel_spacing_hz,
            // All presets keep 20 ms symbols so one ~50 Hz spectrum tick
            // covers one symbol slot on the receive side.
            symbol_duration_ms: 20,
            scheme,
            use_binary_payload,
            chunk_size,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self::standard()),
            "fast" => Some(Self::fast()),
            "dense" => Some(Self::dense()),
            "turbo" => Some(Self::turbo()),
            _ => None,
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["standard", "fast", "dense", "turbo"]
    }

    pub fn samples_per_symbol(&self) -> usize {
        SAMPLE_RATE * self.symbol_duration_ms as usize / 1000
    }

    pub fn payload_encoding(&self) -> PayloadEncoding {
        if self.use_binary_payload {
            PayloadEncoding::Binary
        } else {
            PayloadEncoding::Base64
        }
    }

    /// Width of the carrier comb in Hz, first carrier to last.
    pub fn band_span_hz(&self) -> f32 {
        (self.num_channels as u32 - 1) as f32 * self.channel_spacing_hz as f32
    }
}
