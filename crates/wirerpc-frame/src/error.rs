use crate::message::CompressType;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer did not open the connection with the protocol preamble.
    #[error("invalid protocol preamble {0:02x?}")]
    InvalidPreamble([u8; 5]),

    /// The frame header carries a type byte this protocol does not define.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// A frame body or payload chunk exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The stream ended part-way through a frame.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The connection was closed cleanly at a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded.
    #[error("message encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A message body could not be decoded.
    #[error("message decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// No codec is registered for the requested compression type.
    #[error("unsupported compression type {0:?}")]
    UnsupportedCompression(CompressType),

    /// The compression codec failed.
    #[error("compression error: {0}")]
    Compression(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
