//! Payload streaming in both directions.
//!
//! [`PayloadWriter`] emits one call's chunks with contiguous indices starting
//! at 0; [`ChunkStream`] hands a consumer the chunks the read loop routed to
//! its call, undoing any compression on the way out.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use wirerpc_frame::{encode_payload, CompressType, PayloadChunk};

use crate::close::CloseState;
use crate::config::ConnConfig;
use crate::error::{Result, RpcError};
use crate::queue::WriteQueue;

/// Writes the payload stream of one request or response.
pub struct PayloadWriter {
    queue: WriteQueue,
    rid: u64,
    next_index: u32,
    enabled: bool,
    finished: bool,
    compress_type: CompressType,
    config: Arc<ConnConfig>,
}

impl PayloadWriter {
    pub(crate) fn new(
        queue: WriteQueue,
        rid: u64,
        enabled: bool,
        compress_type: CompressType,
        config: Arc<ConnConfig>,
    ) -> Self {
        Self {
            queue,
            rid,
            next_index: 0,
            enabled,
            finished: false,
            compress_type,
            config,
        }
    }

    /// Correlation id stamped on every chunk.
    pub fn rid(&self) -> u64 {
        self.rid
    }

    /// False when the message this stream belongs to declared no payload.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True once the terminal chunk has been enqueued.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Enqueue one chunk. `more = false` marks it as the last.
    pub async fn write_chunk(&mut self, data: impl Into<Bytes>, more: bool) -> Result<()> {
        if !self.enabled {
            return Err(RpcError::PayloadMisuse("message was sent without a payload"));
        }
        if self.finished {
            return Err(RpcError::PayloadMisuse("payload stream already finished"));
        }

        let data = self.config.compressors.compress(self.compress_type, data.into())?;
        let frame = encode_payload(self.rid, self.next_index, more, &data)?;
        self.queue.send(frame).await?;

        tracing::trace!(rid = self.rid, index = self.next_index, more, len = data.len(), "payload chunk queued");
        self.next_index += 1;
        self.finished = !more;
        Ok(())
    }

    /// Send `data` as the rest of the stream, split at the configured chunk size.
    ///
    /// An empty `data` sends a single empty terminal chunk.
    pub async fn write_all(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let mut data = data.into();
        let chunk_size = self.config.chunk_size.max(1);
        loop {
            let take = data.len().min(chunk_size);
            let chunk = data.split_to(take);
            let more = !data.is_empty();
            self.write_chunk(chunk, more).await?;
            if !more {
                return Ok(());
            }
        }
    }

    /// Terminate the stream with an empty chunk if it is still open.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished || !self.enabled {
            return Ok(());
        }
        self.write_chunk(Bytes::new(), false).await
    }

    /// Stream everything `source` yields, marking the final chunk terminal.
    ///
    /// Reads one chunk ahead so the last data-bearing chunk carries
    /// `more = false`. An empty source sends one empty terminal chunk.
    /// Returns the number of bytes read from `source`.
    pub async fn copy_from<R>(&mut self, mut source: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let chunk_size = self.config.chunk_size.max(1);
        let mut total = 0u64;
        let mut pending = read_chunk(&mut source, chunk_size).await?;

        loop {
            if pending.is_empty() {
                self.write_chunk(Bytes::new(), false).await?;
                return Ok(total);
            }
            total += pending.len() as u64;
            let next = read_chunk(&mut source, chunk_size).await?;
            let more = !next.is_empty();
            self.write_chunk(pending, more).await?;
            if !more {
                return Ok(total);
            }
            pending = next;
        }
    }
}

/// Read up to `chunk_size` bytes, short only at end of input.
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, chunk_size: usize) -> Result<Bytes> {
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;
    while filled < chunk_size {
        let n = source
            .read(&mut buf[filled..])
            .await
            .map_err(wirerpc_frame::FrameError::from)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf.freeze())
}

/// Consumer side of one call's payload chunk queue.
pub(crate) struct ChunkStream {
    rx: mpsc::Receiver<PayloadChunk>,
    close: Arc<CloseState>,
    config: Arc<ConnConfig>,
    compress_type: CompressType,
    done: bool,
}

impl ChunkStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<PayloadChunk>,
        close: Arc<CloseState>,
        config: Arc<ConnConfig>,
    ) -> Self {
        Self {
            rx,
            close,
            config,
            compress_type: CompressType::None,
            done: false,
        }
    }

    pub(crate) fn set_compress_type(&mut self, compress_type: CompressType) {
        self.compress_type = compress_type;
    }

    /// Mark the stream as carrying no chunks at all.
    pub(crate) fn finish_empty(&mut self) {
        self.done = true;
    }

    /// Next chunk in index order, or `None` after the terminal chunk.
    ///
    /// Chunks already queued are returned even after the connection closes.
    pub(crate) async fn next(&mut self) -> Result<Option<PayloadChunk>> {
        if self.done {
            return Ok(None);
        }
        let chunk = tokio::select! {
            biased;
            chunk = self.rx.recv() => chunk,
            _ = self.close.cancelled() => None,
        };
        let Some(mut chunk) = chunk else {
            return Err(self.close.closed_error());
        };

        if !chunk.more {
            self.done = true;
        }
        chunk.data = self
            .config
            .compressors
            .decompress(self.compress_type, chunk.data)?;
        Ok(Some(chunk))
    }

    /// Concatenate every remaining chunk.
    pub(crate) async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.next().await? {
            body.extend_from_slice(&chunk.data);
        }
        Ok(body.freeze())
    }
}
