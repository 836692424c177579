//! The modem: bits to audio samples and microphone spectra back to bits,
//! plus the frame synchronizer that sits between raw bits and packets.

pub mod demodulator;
pub mod modulator;
pub mod sync;
