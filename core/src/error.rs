use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToneLinkError {
    #[error("no frequency band fits {channels} channels at {spacing_hz} Hz spacing")]
    NoViableBand { channels: usize, spacing_hz: u32 },

    #[error("corrupt compressed stream: {0}")]
    CorruptStream(&'static str),

    #[error("packet parse error: {0}")]
    PacketParse(String),

    #[error("chunk index {0} exceeds the protocol limit")]
    ChunkIndexOutOfRange(u32),

    #[error("demodulator packet buffer overflow")]
    BufferOverflow,

    #[error("transfer canceled")]
    Canceled,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient data")]
    InsufficientData,
}

pub type Result<T> = std::result::Result<T, ToneLinkError>;
