use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: type (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Preamble length in bytes.
pub const PREAMBLE_SIZE: usize = 5;

/// Magic bytes sent once in each direction before any frame: "WRPC" + version 1.
pub const PREAMBLE: [u8; PREAMBLE_SIZE] = [0x57, 0x52, 0x50, 0x43, 0x01];

/// Default maximum frame body size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Default maximum raw payload chunk size: 16 MiB.
pub const DEFAULT_MAX_CHUNK: usize = 16 * 1024 * 1024;

/// The kind of message a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Request = 1,
    Response = 2,
    Payload = 3,
}

impl FrameType {
    /// Human-readable name for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Request => "request",
            FrameType::Response => "response",
            FrameType::Payload => "payload",
        }
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameType::Request),
            2 => Ok(FrameType::Response),
            3 => Ok(FrameType::Payload),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }
}

/// The fixed header written before every frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, length: u32) -> Self {
        Self { frame_type, length }
    }

    /// Encode into the wire format.
    ///
    /// ```text
    /// ┌────────────┬────────────────┬─────────────────┐
    /// │ Type (1B)  │ Length (4B LE) │ Body (Length B) │
    /// │ 1=Request  │                │ MessagePack map │
    /// │ 2=Response │                │                 │
    /// │ 3=Payload  │                │                 │
    /// └────────────┴────────────────┴─────────────────┘
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = self.length.to_le_bytes();
        [self.frame_type as u8, len[0], len[1], len[2], len[3]]
    }

    /// Decode a header; an undefined type byte is a protocol error.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let frame_type = FrameType::try_from(buf[0])?;
        let length = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        Ok(Self { frame_type, length })
    }
}

/// Append one complete frame (header + body) to `dst`.
pub fn encode_frame(frame_type: FrameType, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(body.len()).map_err(|_| FrameError::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&FrameHeader::new(frame_type, length).encode());
    dst.put_slice(body);
    Ok(())
}

/// Verify a received preamble.
pub fn check_preamble(buf: &[u8; PREAMBLE_SIZE]) -> Result<()> {
    if *buf != PREAMBLE {
        return Err(FrameError::InvalidPreamble(*buf));
    }
    Ok(())
}

/// Size limits applied while reading frames.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum encoded message body size in bytes. Default: 16 MiB.
    pub max_frame_size: usize,
    /// Maximum raw payload chunk size in bytes. Default: 16 MiB.
    pub max_chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            max_chunk_size: DEFAULT_MAX_CHUNK,
        }
    }
}
