//! Typed application packets and their ASCII wire form.
//!
//! Three packet kinds travel over the air: `META:` followed by a JSON
//! metadata object, `DATA:<index>:<payload>` and `END:<status>`. Payload
//! bytes are carried either Base64-encoded or as their 8-bit MSB-first
//! `'0'`/`'1'` expansion; the choice is recorded in the metadata so the
//! receiver can invert it after byte framing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToneLinkError};
use crate::MAX_CHUNK_INDEX;

const META_TAG: &str = "META:";
const DATA_TAG: &str = "DATA:";
const END_TAG: &str = "END:";

/// How chunk payload bytes are rendered into the ASCII packet body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    Base64,
    Binary,
}

impl PayloadEncoding {
    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            PayloadEncoding::Base64 => BASE64.encode(bytes),
            PayloadEncoding::Binary => {
                let mut text = String::with_capacity(bytes.len() * 8);
                for &byte in bytes {
                    for shift in (0..8).rev() {
                        text.push(if (byte >> shift) & 1 == 1 { '1' } else { '0' });
                    }
                }
                text
            }
        }
    }

    pub fn decode(&self, payload: &str) -> Result<Vec<u8>> {
        match self {
            PayloadEncoding::Base64 => BASE64
                .decode(payload)
                .map_err(|e| ToneLinkError::PacketParse(format!("base64 payload: {e}"))),
            PayloadEncoding::Binary => {
                if payload.len() % 8 != 0 {
                    return Err(ToneLinkError::PacketParse(format!(
                        "binary payload length {} is not a multiple of 8",
                        payload.len()
                    )));
                }
                let mut bytes = Vec::with_capacity(payload.len() / 8);
                let mut acc = 0u8;
                for (i, c) in payload.chars().enumerate() {
                    acc = match c {
                        '0' => acc << 1,
                        '1' => acc << 1 | 1,
                        _ => {
                            return Err(ToneLinkError::PacketParse(format!(
                                "binary payload contains '{c}'"
                            )))
                        }
                    };
                    if i % 8 == 7 {
                        bytes.push(acc);
                        acc = 0;
                    }
                }
                Ok(bytes)
            }
        }
    }
}

/// Transfer metadata carried in the `META` packet. `size`, `checksum` and
/// `crc` describe the post-compression byte stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
    pub original_size: u64,
    pub compressed: bool,
    pub checksum: u16,
    pub crc: u16,
    pub chunks: u32,
    pub timestamp: u64,
    pub encoding: PayloadEncoding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Meta(FileMetadata),
    Data { index: u32, payload: String },
    End { reason: String },
}

impl Packet {
    /// ASCII packet body, without the frame delimiter.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let text = match self {
            Packet::Meta(metadata) => {
                let json = serde_json::to_string(metadata).map_err(|e| {
                    ToneLinkError::InvalidConfig(format!("metadata encode: {e}"))
                })?;
                format!("{META_TAG}{json}")
            }
            Packet::Data { index, payload } => {
                if *index >= MAX_CHUNK_INDEX {
                    return Err(ToneLinkError::ChunkIndexOutOfRange(*index));
                }
                format!("{DATA_TAG}{index}:{payload}")
            }
            Packet::End { reason } => format!("{END_TAG}{reason}"),
        };
        Ok(text.into_bytes())
    }

    pub fn parse(body: &[u8]) -> Result<Packet> {
        let text = std::str::from_utf8(body)
            .map_err(|_| ToneLinkError::PacketParse("body is not ASCII".to_string()))?;

        if let Some(json) = text.strip_prefix(META_TAG) {
            let metadata: FileMetadata = serde_json::from_str(json)
                .map_err(|e| ToneLinkError::PacketParse(format!("metadata: {e}")))?;
            return Ok(Packet::Meta(metadata));
        }
        if let Some(rest) = text.strip_prefix(DATA_TAG) {
            let (index_text, payload) = rest.split_once(':').ok_or_else(|| {
                ToneLinkError::PacketParse("DATA packet missing payload separator".to_string())
            })?;
            let index: u32 = index_text.parse().map_err(|_| {
                ToneLinkError::PacketParse(format!("bad chunk index '{index_text}'"))
            })?;
            if index >= MAX_CHUNK_INDEX {
                return Err(ToneLinkError::ChunkIndexOutOfRange(index));
            }
            return Ok(Packet::Data {
                index,
                payload: payload.to_string(),
            });
        }
        if let Some(reason) = text.strip_prefix(END_TAG) {
            return Ok(Packet::End {
                reason: reason.to_string(),
            });
        }
        let head: String = text.chars().take(16).collect();
        Err(ToneLinkError::PacketParse(format!(
            "unknown packet tag in {head:?}"
        )))
    }
}
