//! Frame encoding into single contiguous buffers.
//!
//! Every function here returns one `Bytes` holding a complete frame, so a
//! producer can hand it to the connection's write queue and know it will hit
//! the wire without another frame's bytes interleaved.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_frame, FrameType, HEADER_SIZE, PREAMBLE};
use crate::error::{FrameError, Result};
use crate::message::{encode_message, PayloadHeader, Request, Response};

/// Encode a Request frame.
pub fn encode_request(request: &Request) -> Result<Bytes> {
    encode_message_frame(FrameType::Request, &encode_message(request)?)
}

/// Encode a Response frame.
pub fn encode_response(response: &Response) -> Result<Bytes> {
    encode_message_frame(FrameType::Response, &encode_message(response)?)
}

/// Encode a Payload frame: header, encoded chunk header, then the raw data.
pub fn encode_payload(rid: u64, index: u32, more: bool, data: &[u8]) -> Result<Bytes> {
    let length = u32::try_from(data.len()).map_err(|_| FrameError::FrameTooLarge {
        size: data.len(),
        max: u32::MAX as usize,
    })?;
    let header = PayloadHeader {
        index,
        rid,
        more,
        length,
    };
    let body = encode_message(&header)?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len() + data.len());
    encode_frame(FrameType::Payload, &body, &mut buf)?;
    buf.put_slice(data);
    Ok(buf.freeze())
}

/// Write this side's preamble directly to the stream.
pub async fn write_preamble<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&PREAMBLE).await?;
    writer.flush().await?;
    Ok(())
}

fn encode_message_frame(frame_type: FrameType, body: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    encode_frame(frame_type, body, &mut buf)?;
    Ok(buf.freeze())
}
