//! What a server handler sees: the request, its payload, the session it
//! arrived on, and a writer for the answer.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use wirerpc_frame::{encode_response, PayloadChunk, Request, Response};

use crate::config::ConnConfig;
use crate::error::{Result, RpcError};
use crate::payload::{ChunkStream, PayloadWriter};
use crate::queue::WriteQueue;

/// Per-connection state shared by every handler on a server connection.
pub struct Session {
    id: u64,
    peer: String,
    authenticated: AtomicBool,
    identity: Mutex<Option<String>>,
}

impl Session {
    pub(crate) fn new(id: u64, peer: impl Into<String>) -> Self {
        Self {
            id,
            peer: peer.into(),
            authenticated: AtomicBool::new(false),
            identity: Mutex::new(None),
        }
    }

    /// Server-assigned connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transport-level peer label (address or credentials).
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Identity recorded by the last successful login.
    pub fn identity(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mark the connection authenticated as `identity`.
    pub fn authenticate(&self, identity: impl Into<String>) {
        *self
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity.into());
        self.authenticated.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("authenticated", &self.is_authenticated())
            .field("identity", &self.identity())
            .finish()
    }
}

/// Incoming side of one request.
pub struct RequestReader {
    request: Request,
    chunks: ChunkStream,
    session: Arc<Session>,
}

impl RequestReader {
    pub(crate) fn new(request: Request, mut chunks: ChunkStream, session: Arc<Session>) -> Self {
        if request.has_payload {
            chunks.set_compress_type(request.compress_type);
        } else {
            chunks.finish_empty();
        }
        Self {
            request,
            chunks,
            session,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Next request payload chunk; `None` after the last one or when the
    /// request carries no payload.
    pub async fn payload(&mut self) -> Result<Option<PayloadChunk>> {
        self.chunks.next().await
    }

    /// Collect the rest of the request payload.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.chunks.read_to_end().await
    }
}

/// Outgoing side of one request: exactly one Response, then its payload.
pub struct ResponseWriter {
    request_id: u64,
    queue: WriteQueue,
    config: Arc<ConnConfig>,
    payload: Option<PayloadWriter>,
}

impl ResponseWriter {
    pub(crate) fn new(request_id: u64, queue: WriteQueue, config: Arc<ConnConfig>) -> Self {
        Self {
            request_id,
            queue,
            config,
            payload: None,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// True once the Response frame has been enqueued.
    pub fn is_written(&self) -> bool {
        self.payload.is_some()
    }

    /// Enqueue the Response. Its `request_id` is set to the request's id.
    pub async fn write_response(&mut self, mut response: Response) -> Result<()> {
        if self.payload.is_some() {
            return Err(RpcError::ResponseAlreadyWritten(self.request_id));
        }
        if !self.config.compressors.supports(response.compress_type) {
            return Err(wirerpc_frame::FrameError::UnsupportedCompression(response.compress_type).into());
        }

        response.request_id = self.request_id;
        let frame = encode_response(&response)?;
        self.queue.send(frame).await?;

        self.payload = Some(PayloadWriter::new(
            self.queue.clone(),
            self.request_id,
            response.has_payload,
            response.compress_type,
            self.config.clone(),
        ));
        Ok(())
    }

    /// Enqueue one response payload chunk.
    pub async fn write_chunk(&mut self, data: impl Into<Bytes>, more: bool) -> Result<()> {
        self.payload_writer()?.write_chunk(data, more).await
    }

    /// Send `data` as the whole remaining response payload.
    pub async fn write_payload(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.payload_writer()?.write_all(data).await
    }

    /// The payload stream of the written response.
    pub fn payload_writer(&mut self) -> Result<&mut PayloadWriter> {
        self.payload
            .as_mut()
            .ok_or(RpcError::PayloadMisuse("payload written before response"))
    }

    /// Answer with `response` and, if given, `body` as its payload.
    pub async fn reply(&mut self, mut response: Response, body: Option<Bytes>) -> Result<()> {
        response.has_payload = body.is_some();
        self.write_response(response).await?;
        if let Some(body) = body {
            self.write_payload(body).await?;
        }
        Ok(())
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        if self.queue.is_closed() {
            return;
        }
        match &self.payload {
            None => {
                tracing::debug!(request_id = self.request_id, "handler finished without a response");
            }
            Some(payload) if payload.is_enabled() && !payload.is_finished() => {
                tracing::debug!(request_id = self.request_id, "response payload left unterminated");
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::DuplexStream;
    use wirerpc_frame::{Code, Frame, FrameReader};

    use super::*;
    use crate::close::CloseState;

    fn response_writer(id: u64) -> (ResponseWriter, FrameReader<DuplexStream>) {
        let (local, remote) = tokio::io::duplex(4096);
        let (queue, _drain) = WriteQueue::spawn(local, 8, Arc::new(CloseState::new()));
        let writer = ResponseWriter::new(id, queue, Arc::default());
        (writer, FrameReader::new(remote))
    }

    #[tokio::test]
    async fn chunk_before_response_is_rejected() {
        let (mut writer, mut wire) = response_writer(4);

        let err = writer.write_chunk(&b"early"[..], false).await.unwrap_err();
        assert!(matches!(err, RpcError::PayloadMisuse(_)));
        assert!(!writer.is_written());

        // Nothing reached the wire ahead of the Response.
        writer.write_response(Response::ok()).await.unwrap();
        match wire.read_frame().await.unwrap() {
            Frame::Response(response) => assert_eq!(response.request_id, 4),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_response_is_rejected() {
        let (mut writer, mut wire) = response_writer(9);

        writer
            .write_response(Response::ok().with_message("first"))
            .await
            .unwrap();
        let err = writer
            .write_response(Response::error(Code::SerInternal, "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ResponseAlreadyWritten(9)));

        match wire.read_frame().await.unwrap() {
            Frame::Response(response) => assert_eq!(response.message, "first"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunk_after_bare_response_is_rejected() {
        let (mut writer, _wire) = response_writer(2);

        writer.write_response(Response::ok()).await.unwrap();
        let err = writer.write_chunk(&b"extra"[..], false).await.unwrap_err();
        assert!(matches!(err, RpcError::PayloadMisuse(_)));
    }

    #[test]
    fn session_login_records_identity() {
        let session = Session::new(3, "tcp:127.0.0.1:9");
        assert!(!session.is_authenticated());
        assert_eq!(session.identity(), None);

        session.authenticate("alice");
        assert!(session.is_authenticated());
        assert_eq!(session.identity().as_deref(), Some("alice"));
        assert!(format!("{session:?}").contains("alice"));
    }
}
