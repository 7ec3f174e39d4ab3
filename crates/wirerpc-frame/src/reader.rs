use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{check_preamble, FrameConfig, FrameHeader, FrameType, HEADER_SIZE, PREAMBLE_SIZE};
use crate::error::{FrameError, Result};
use crate::message::{decode_message, Frame, PayloadChunk, PayloadHeader, Request, Response};

/// Reads complete frames from any `AsyncRead` stream.
///
/// Handles partial reads internally; callers always get whole frames or an error.
pub struct FrameReader<R> {
    inner: R,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read and verify the peer's preamble.
    pub async fn read_preamble(&mut self) -> Result<()> {
        let mut buf = [0u8; PREAMBLE_SIZE];
        self.read_exact_or_closed(&mut buf).await?;
        check_preamble(&buf)
    }

    /// Read the next frame header.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` on EOF at a frame boundary.
    pub async fn read_header(&mut self) -> Result<FrameHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.read_exact_or_closed(&mut buf).await?;
        FrameHeader::decode(&buf)
    }

    /// Read exactly `length` body bytes.
    pub async fn read_body(&mut self, length: u32) -> Result<Bytes> {
        self.read_sized(length as usize, self.config.max_frame_size)
            .await
    }

    /// Read the next complete frame and decode its message.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let header = self.read_header().await?;
        let body = self.read_body(header.length).await?;

        match header.frame_type {
            FrameType::Request => Ok(Frame::Request(decode_message::<Request>(&body)?)),
            FrameType::Response => Ok(Frame::Response(decode_message::<Response>(&body)?)),
            FrameType::Payload => {
                let payload: PayloadHeader = decode_message(&body)?;
                let data = self
                    .read_sized(payload.length as usize, self.config.max_chunk_size)
                    .await?;
                Ok(Frame::Payload(PayloadChunk {
                    index: payload.index,
                    rid: payload.rid,
                    more: payload.more,
                    data,
                }))
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    async fn read_sized(&mut self, length: usize, max: usize) -> Result<Bytes> {
        if length > max {
            return Err(FrameError::FrameTooLarge { size: length, max });
        }
        let mut buf = BytesMut::zeroed(length);
        let got = self.fill(&mut buf).await?;
        if got < length {
            return Err(FrameError::ShortRead {
                expected: length,
                got,
            });
        }
        Ok(buf.freeze())
    }

    /// Fill `buf` completely; EOF before the first byte is a clean close,
    /// EOF after it is a short read.
    async fn read_exact_or_closed(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.fill(buf).await?;
        match got {
            0 => Err(FrameError::ConnectionClosed),
            n if n < buf.len() => Err(FrameError::ShortRead {
                expected: buf.len(),
                got: n,
            }),
            _ => Ok(()),
        }
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}
