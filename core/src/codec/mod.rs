//! Payload codec: LZ77 compression and the two integrity checks computed over
//! the post-compression byte stream.

pub mod integrity;
pub mod lz77;

pub use integrity::{checksum16, crc16};
pub use lz77::{compress, decompress};
