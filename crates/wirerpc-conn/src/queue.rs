//! Single-writer output queue.
//!
//! All frames for a connection pass through one bounded channel drained by a
//! single task, so each frame reaches the stream as one uninterrupted write
//! and frames appear on the wire in enqueue order.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::close::CloseState;
use crate::error::{Result, RpcError};

/// Producer handle for a connection's write queue.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<Bytes>,
    close: Arc<CloseState>,
}

impl WriteQueue {
    /// Start the drain task for `writer`.
    pub(crate) fn spawn<W>(writer: W, capacity: usize, close: Arc<CloseState>) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(writer, rx, close.clone()));
        (Self { tx, close }, handle)
    }

    /// Enqueue one complete encoded frame.
    ///
    /// Blocks while the queue is full; fails once the connection is closed.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.close.check()?;
        tokio::select! {
            biased;
            _ = self.close.cancelled() => Err(self.close.closed_error()),
            sent = self.tx.send(frame) => sent.map_err(|_| self.close.closed_error()),
        }
    }

    /// Close the connection with `err`. Later calls are no-ops.
    pub fn close(&self, err: RpcError) {
        self.close.close(err);
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }
}

/// How long a locally closed connection keeps writing frames that were
/// already queued.
const LINGER: Duration = Duration::from_secs(1);

async fn drain<W>(mut writer: W, mut rx: mpsc::Receiver<Bytes>, close: Arc<CloseState>)
where
    W: AsyncWrite + Unpin,
{
    let mut mid_frame = false;
    let result = tokio::select! {
        biased;
        _ = close.cancelled() => Ok(()),
        result = drain_frames(&mut writer, &mut rx, &mut mid_frame) => result,
    };
    match result {
        Err(err) => {
            tracing::debug!(error = %err, "write queue drain failed");
            close.close(err);
        }
        // A peer-side failure leaves nobody to read; a local close still
        // delivers what producers queued before it, unless a frame was cut.
        Ok(()) if !mid_frame && close.error().is_some_and(|err| err.is_local_close()) => {
            match tokio::time::timeout(LINGER, write_queued(&mut writer, &mut rx)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::debug!(error = %err, "flushing queued frames failed"),
                Err(_) => tracing::debug!("dropping queued frames after linger timeout"),
            }
        }
        Ok(()) => {}
    }
    let _ = writer.shutdown().await;
}

async fn drain_frames<W>(
    writer: &mut W,
    rx: &mut mpsc::Receiver<Bytes>,
    mid_frame: &mut bool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        // Batch whatever is already queued behind this frame into one flush.
        let mut next = Some(first);
        while let Some(frame) = next.take() {
            *mid_frame = true;
            writer
                .write_all(&frame)
                .await
                .map_err(wirerpc_frame::FrameError::from)?;
            *mid_frame = false;
            next = rx.try_recv().ok();
        }
        writer
            .flush()
            .await
            .map_err(wirerpc_frame::FrameError::from)?;
    }
    Ok(())
}

async fn write_queued<W>(writer: &mut W, rx: &mut mpsc::Receiver<Bytes>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    rx.close();
    while let Ok(frame) = rx.try_recv() {
        writer.write_all(&frame).await?;
    }
    writer.flush().await
}
