//! Client side of a connection: issues requests and routes Response and
//! Payload frames back to the call that is waiting for them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use wirerpc_frame::{encode_request, Frame, FrameReader, PayloadChunk, Request, Response};
use wirerpc_transport::{Endpoint, RpcStream};

use crate::close::CloseState;
use crate::config::{ConnConfig, KeepaliveConfig};
use crate::error::{Result, RpcError};
use crate::handshake::exchange_preamble;
use crate::payload::{ChunkStream, PayloadWriter};
use crate::ping::Pinger;
use crate::queue::WriteQueue;

/// Correlation record for one outstanding call.
struct PendingCall {
    response: Option<oneshot::Sender<Response>>,
    chunks: mpsc::Sender<PayloadChunk>,
    /// Unknown until the Response arrives.
    expects_payload: Option<bool>,
    next_index: u32,
}

struct ClientInner {
    queue: WriteQueue,
    pending: Arc<DashMap<u64, PendingCall>>,
    next_id: AtomicU64,
    close: Arc<CloseState>,
    config: Arc<ConnConfig>,
}

/// A client connection.
///
/// Dropping the `Client` closes the connection with [`RpcError::LocalClose`].
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Dial `endpoint` and start a connection over it.
    pub async fn connect(endpoint: &Endpoint, config: ConnConfig) -> Result<Self> {
        let stream = endpoint.connect().await?;
        Self::from_stream(stream, config).await
    }

    /// Exchange preambles over `stream` and start the read loop and write queue.
    pub async fn from_stream<S: RpcStream>(stream: S, config: ConnConfig) -> Result<Self> {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::with_config(read_half, config.frame.clone());
        exchange_preamble(&mut reader, &mut write_half, config.preamble_timeout).await?;

        let close = Arc::new(CloseState::new());
        let (queue, _drain) = WriteQueue::spawn(write_half, config.queue_capacity, close.clone());

        let pending: Arc<DashMap<u64, PendingCall>> = Arc::new(DashMap::new());
        {
            // Dropping the records releases every waiting consumer.
            let pending = pending.clone();
            close.on_close(move |err| {
                tracing::debug!(error = %err, outstanding = pending.len(), "client connection closed");
                pending.clear();
            });
        }

        let inner = Arc::new(ClientInner {
            queue,
            pending,
            next_id: AtomicU64::new(1),
            close,
            config: Arc::new(config),
        });
        tokio::spawn(read_loop(reader, inner.clone()));

        Ok(Self { inner })
    }

    /// A handle for issuing requests on this connection.
    pub fn open(&self) -> RequestWriter {
        RequestWriter {
            inner: self.inner.clone(),
        }
    }

    /// Close the connection with [`RpcError::LocalClose`].
    pub fn close(&self) {
        self.inner.close.close(RpcError::LocalClose);
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.inner.close.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    /// The error that closed the connection, if it is closed.
    pub fn terminal_error(&self) -> Option<Arc<RpcError>> {
        self.inner.close.error()
    }

    /// Run `callback` once with the terminal error when the connection closes.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(&RpcError) + Send + 'static,
    {
        self.inner.close.on_close(callback);
    }

    /// Number of calls still waiting for a response or payload.
    pub fn outstanding(&self) -> usize {
        self.inner.pending.len()
    }

    /// Probe the peer periodically; the first failed probe closes the connection.
    pub fn spawn_keepalive(&self, config: KeepaliveConfig) -> JoinHandle<()> {
        let pinger = Pinger::new(self.open(), config);
        let close = self.inner.close.clone();
        tokio::spawn(async move {
            let err = pinger.run().await;
            if !close.is_closed() {
                tracing::warn!(error = %err, "keepalive failed, closing connection");
            }
            close.close(err);
        })
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.close.close(RpcError::LocalClose);
    }
}

/// Issues requests on a client connection. Cheap to clone.
#[derive(Clone)]
pub struct RequestWriter {
    inner: Arc<ClientInner>,
}

impl RequestWriter {
    /// Send `request` and return its payload writer and response reader.
    ///
    /// An `id` of 0 is replaced with the next id from the connection counter.
    pub async fn write(&self, mut request: Request) -> Result<(PayloadWriter, ResponseReader)> {
        let inner = &self.inner;
        inner.close.check()?;
        if request.id == 0 {
            request.id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        }
        if !inner.config.compressors.supports(request.compress_type) {
            return Err(
                wirerpc_frame::FrameError::UnsupportedCompression(request.compress_type).into(),
            );
        }
        let frame = encode_request(&request)?;

        let (response_tx, response_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(inner.config.chunk_queue_capacity.max(1));
        match inner.pending.entry(request.id) {
            Entry::Occupied(_) => return Err(RpcError::DuplicateRequestId(request.id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    response: Some(response_tx),
                    chunks: chunk_tx,
                    expects_payload: None,
                    next_index: 0,
                });
            }
        }

        // Registered before sending so the response can never beat the record.
        if let Err(err) = inner.queue.send(frame).await {
            inner.pending.remove(&request.id);
            return Err(err);
        }
        tracing::trace!(id = request.id, method = %request.method, "request sent");

        let payload = PayloadWriter::new(
            inner.queue.clone(),
            request.id,
            request.has_payload,
            request.compress_type,
            inner.config.clone(),
        );
        let response = ResponseReader {
            request_id: request.id,
            response_rx: Some(response_rx),
            response: None,
            chunks: ChunkStream::new(chunk_rx, inner.close.clone(), inner.config.clone()),
            close: inner.close.clone(),
        };
        Ok((payload, response))
    }

    /// Send `request` with `source` streamed as its payload.
    pub async fn write_with_payload<R>(
        &self,
        request: Request,
        source: R,
    ) -> Result<(PayloadWriter, ResponseReader)>
    where
        R: AsyncRead + Unpin,
    {
        let request = Request {
            has_payload: true,
            ..request
        };
        let (mut payload, response) = self.write(request).await?;
        payload.copy_from(source).await?;
        Ok((payload, response))
    }

    /// Send `request` with an optional body and collect the full answer.
    pub async fn call(&self, request: Request, body: Option<Bytes>) -> Result<(Response, Bytes)> {
        let request = Request {
            has_payload: body.is_some(),
            ..request
        };
        let (mut payload, mut response) = self.write(request).await?;
        if let Some(body) = body {
            payload.write_all(body).await?;
        }
        let head = response.response().await?;
        let body = response.read_to_end().await?;
        Ok((head, body))
    }

    /// [`Self::call`] bounded by `timeout`.
    ///
    /// A timed-out call's correlation record stays until the connection closes.
    pub async fn call_timeout(
        &self,
        request: Request,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<(Response, Bytes)> {
        tokio::time::timeout(timeout, self.call(request, body))
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close.is_closed()
    }

    pub(crate) async fn closed(&self) {
        self.inner.close.cancelled().await
    }

    pub(crate) fn closed_error(&self) -> RpcError {
        self.inner.close.closed_error()
    }
}

/// Receives the Response and response payload of one call.
pub struct ResponseReader {
    request_id: u64,
    response_rx: Option<oneshot::Receiver<Response>>,
    response: Option<Response>,
    chunks: ChunkStream,
    close: Arc<CloseState>,
}

impl ResponseReader {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Wait for the Response. Later calls return the same Response.
    pub async fn response(&mut self) -> Result<Response> {
        if let Some(response) = &self.response {
            return Ok(response.clone());
        }
        let Some(rx) = self.response_rx.as_mut() else {
            return Err(self.close.closed_error());
        };

        let received = tokio::select! {
            biased;
            received = rx => received.ok(),
            _ = self.close.cancelled() => None,
        };
        let Some(response) = received else {
            return Err(self.close.closed_error());
        };
        self.response_rx = None;

        if response.has_payload {
            self.chunks.set_compress_type(response.compress_type);
        } else {
            self.chunks.finish_empty();
        }
        self.response = Some(response.clone());
        Ok(response)
    }

    /// Next response payload chunk; `None` after the last one or when the
    /// response carries no payload. Waits for the Response first if needed.
    pub async fn payload(&mut self) -> Result<Option<PayloadChunk>> {
        if self.response.is_none() {
            self.response().await?;
        }
        self.chunks.next().await
    }

    /// Collect the rest of the response payload.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        if self.response.is_none() {
            self.response().await?;
        }
        self.chunks.read_to_end().await
    }
}

async fn read_loop<R>(mut reader: FrameReader<R>, inner: Arc<ClientInner>)
where
    R: AsyncRead + Unpin,
{
    let err = loop {
        let frame = tokio::select! {
            biased;
            _ = inner.close.cancelled() => return,
            frame = reader.read_frame() => frame,
        };
        let routed = match frame {
            Ok(frame) => route_frame(&inner, frame).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = routed {
            break err;
        }
    };

    if err.is_disconnect() {
        tracing::debug!("server closed the connection");
    } else {
        tracing::warn!(error = %err, "client connection failed");
    }
    inner.close.close(err);
}

async fn route_frame(inner: &ClientInner, frame: Frame) -> Result<()> {
    match frame {
        Frame::Request(request) => Err(RpcError::Protocol(format!(
            "unexpected request frame for '{}' on client connection",
            request.method
        ))),
        Frame::Response(response) => route_response(inner, response),
        Frame::Payload(chunk) => route_chunk(inner, chunk).await,
    }
}

fn route_response(inner: &ClientInner, response: Response) -> Result<()> {
    let id = response.request_id;
    let sender = {
        let mut call = inner
            .pending
            .get_mut(&id)
            .ok_or(RpcError::UnknownRequestId(id))?;
        let sender = call
            .response
            .take()
            .ok_or_else(|| RpcError::Protocol(format!("second response for request {id}")))?;
        call.expects_payload = Some(response.has_payload);
        sender
    };

    if !response.has_payload {
        inner.pending.remove(&id);
    }
    // The caller may have given up on the response.
    let _ = sender.send(response);
    Ok(())
}

async fn route_chunk(inner: &ClientInner, chunk: PayloadChunk) -> Result<()> {
    let rid = chunk.rid;
    let sender = {
        let mut call = inner
            .pending
            .get_mut(&rid)
            .ok_or(RpcError::UnknownRequestId(rid))?;
        match call.expects_payload {
            None => {
                return Err(RpcError::Protocol(format!(
                    "payload chunk for request {rid} arrived before its response"
                )))
            }
            Some(false) => {
                return Err(RpcError::Protocol(format!(
                    "payload chunk for request {rid} whose response has no payload"
                )))
            }
            Some(true) => {}
        }
        if chunk.index != call.next_index {
            return Err(RpcError::Protocol(format!(
                "payload chunk {} for request {rid}, expected {}",
                chunk.index, call.next_index
            )));
        }
        call.next_index += 1;
        call.chunks.clone()
    };

    if !chunk.more {
        inner.pending.remove(&rid);
    }
    // A full queue must not hold the read loop past a close, which the loop
    // observes on its next turn. A consumer that dropped its reader just
    // loses the chunk.
    tokio::select! {
        biased;
        _ = inner.close.cancelled() => {}
        _ = sender.send(chunk) => {}
    }
    Ok(())
}
