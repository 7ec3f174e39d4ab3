//! Typed binary framing for the wirerpc protocol.
//!
//! Every connection starts with a 5-byte preamble in each direction, after
//! which the stream is a sequence of frames:
//! - A 1-byte frame type (Request, Response, Payload)
//! - A 4-byte little-endian body length
//! - The MessagePack-encoded message body
//!
//! Payload frames are followed by the raw chunk bytes the Payload message
//! announces. Readers never expose partial frames.

pub mod codec;
pub mod compress;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    FrameConfig, FrameHeader, FrameType, DEFAULT_MAX_CHUNK, DEFAULT_MAX_FRAME, HEADER_SIZE,
    PREAMBLE, PREAMBLE_SIZE,
};
pub use compress::{Compressor, Compressors};
pub use error::{FrameError, Result};
pub use message::{
    decode_message, encode_message, AuthData, Code, CompressType, ExtKv, Frame, PayloadChunk,
    PayloadHeader, Ping, Pong, Request, Response, AUTH_METHOD, PING_METHOD,
};
pub use reader::FrameReader;
pub use writer::{encode_payload, encode_request, encode_response, write_preamble};
