//! Server side: accepts connections, decodes requests and runs each one's
//! handler concurrently.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use wirerpc_frame::{encode_response, Code, Frame, FrameReader, PayloadChunk, Request, Response};
use wirerpc_transport::{Listener, RpcStream};

use crate::close::CloseState;
use crate::config::{ConnConfig, ServerConfig};
use crate::context::{RequestReader, ResponseWriter, Session};
use crate::error::{Result, RpcError};
use crate::handshake::exchange_preamble;
use crate::payload::ChunkStream;
use crate::queue::WriteQueue;
use crate::router::Router;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Correlation record for a request whose payload is still arriving.
struct InFlight {
    chunks: mpsc::Sender<PayloadChunk>,
    next_index: u32,
}

/// A counted entry in [`Server::active_connections`], released on drop.
struct ActiveSlot(Arc<AtomicUsize>);

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An RPC server. Clones share the router, config and shutdown signal.
#[derive(Clone)]
pub struct Server {
    router: Arc<Router>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl Server {
    pub fn new(router: Router) -> Self {
        Self::with_config(router, ServerConfig::default())
    }

    pub fn with_config(router: Router, config: ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stop accepting and close every connection with [`RpcError::ServerShutdown`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Accept connections from `listener` until shutdown or an accept error.
    pub async fn serve<L: Listener + ?Sized>(&self, listener: &L) -> Result<()> {
        tracing::info!(endpoint = %listener.local_addr(), "serving");
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted?,
            };

            let Some(slot) = self.reserve_slot() else {
                tracing::warn!(
                    peer = %accepted.peer,
                    max = self.config.max_connections,
                    "connection limit reached, dropping connection"
                );
                continue;
            };

            let server = self.clone();
            tokio::spawn(async move {
                match server.serve_in_slot(slot, accepted.stream, accepted.peer).await {
                    Ok(()) => {}
                    Err(err) if err.is_disconnect() => {
                        tracing::debug!(error = %err, "peer left before the preamble exchange");
                    }
                    Err(err) => tracing::warn!(error = %err, "connection ended with error"),
                }
            });
        }
    }

    /// Serve one already-accepted stream until it closes.
    ///
    /// Returns `Ok(())` when the peer disconnects cleanly or the server shuts
    /// down, and the terminal error otherwise. The connection limit only
    /// applies to streams accepted by [`Server::serve`].
    pub async fn serve_connection<S: RpcStream>(&self, stream: S, peer: impl Into<String>) -> Result<()> {
        self.active.fetch_add(1, Ordering::AcqRel);
        let slot = ActiveSlot(self.active.clone());
        self.serve_in_slot(slot, stream, peer.into()).await
    }

    /// Claim a connection slot, or `None` when `max_connections` are active.
    fn reserve_slot(&self) -> Option<ActiveSlot> {
        let max = self.config.max_connections.unwrap_or(usize::MAX);
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(ActiveSlot(self.active.clone()))
    }

    async fn serve_in_slot<S: RpcStream>(&self, _slot: ActiveSlot, stream: S, peer: String) -> Result<()> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!("conn", id, peer = %peer);
        self.run_connection(stream, Session::new(id, peer))
            .instrument(span)
            .await
    }

    async fn run_connection<S: RpcStream>(&self, stream: S, session: Session) -> Result<()> {
        let conn_config = Arc::new(self.config.conn.clone());
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::with_config(read_half, conn_config.frame.clone());
        exchange_preamble(&mut reader, &mut write_half, conn_config.preamble_timeout).await?;

        let close = Arc::new(CloseState::new());
        let (queue, _drain) =
            WriteQueue::spawn(write_half, conn_config.queue_capacity, close.clone());
        let inflight: Arc<DashMap<u64, InFlight>> = Arc::new(DashMap::new());
        {
            let inflight = inflight.clone();
            close.on_close(move |_| inflight.clear());
        }
        tracing::debug!("connection established");

        let conn = ServerConn {
            router: self.router.clone(),
            config: conn_config,
            queue,
            inflight,
            close,
            session: Arc::new(session),
            shutdown: self.shutdown.clone(),
        };
        let err = conn.read_loop(&mut reader).await;

        if matches!(*err, RpcError::ServerShutdown) {
            Ok(())
        } else if err.is_disconnect() {
            tracing::debug!("peer disconnected");
            Ok(())
        } else {
            Err(RpcError::Closed(err))
        }
    }
}

struct ServerConn {
    router: Arc<Router>,
    config: Arc<ConnConfig>,
    queue: WriteQueue,
    inflight: Arc<DashMap<u64, InFlight>>,
    close: Arc<CloseState>,
    session: Arc<Session>,
    shutdown: CancellationToken,
}

impl ServerConn {
    /// Route frames until the connection closes; returns the terminal error.
    async fn read_loop<R>(&self, reader: &mut FrameReader<R>) -> Arc<RpcError>
    where
        R: AsyncRead + Unpin,
    {
        let failure = loop {
            let frame = tokio::select! {
                biased;
                _ = self.close.cancelled() => break None,
                _ = self.shutdown.cancelled() => break Some(RpcError::ServerShutdown),
                frame = reader.read_frame() => frame,
            };
            let routed = match frame {
                Ok(frame) => self.route_frame(frame).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = routed {
                break Some(err);
            }
        };

        if let Some(err) = failure {
            if !matches!(err, RpcError::ServerShutdown) && !err.is_disconnect() {
                tracing::warn!(error = %err, "closing connection");
            }
            self.close.close(err);
        }
        self.close
            .error()
            .unwrap_or_else(|| Arc::new(RpcError::LocalClose))
    }

    async fn route_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Request(request) => self.dispatch(request).await,
            Frame::Payload(chunk) => self.route_chunk(chunk).await,
            Frame::Response(response) => Err(RpcError::Protocol(format!(
                "unexpected response frame for request {} on server connection",
                response.request_id
            ))),
        }
    }

    async fn dispatch(&self, request: Request) -> Result<()> {
        let id = request.id;
        let handler = self
            .router
            .get(&request.method)
            .ok_or_else(|| RpcError::MethodNotFound(request.method.clone()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel(self.config.chunk_queue_capacity.max(1));
        if request.has_payload {
            if self.inflight.contains_key(&id) {
                return Err(RpcError::DuplicateRequestId(id));
            }
            self.inflight.insert(
                id,
                InFlight {
                    chunks: chunk_tx,
                    next_index: 0,
                },
            );
        }

        if !self.config.compressors.supports(request.compress_type) {
            // The request's chunks still arrive; with the receiver gone they are discarded.
            drop(chunk_rx);
            let response = Response::error(Code::ReqUnknownCompressType, "").with_request_id(id);
            return self.queue.send(encode_response(&response)?).await;
        }

        tracing::debug!(id, method = %request.method, has_payload = request.has_payload, "dispatching request");
        let method = request.method.clone();
        let reader = RequestReader::new(
            request,
            ChunkStream::new(chunk_rx, self.close.clone(), self.config.clone()),
            self.session.clone(),
        );
        let writer = ResponseWriter::new(id, self.queue.clone(), self.config.clone());

        tokio::spawn(
            async move {
                let outcome = AssertUnwindSafe(async move { handler.call(reader, writer).await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => tracing::warn!(id, method = %method, error = %err, "handler failed"),
                    Err(panic) => tracing::error!(
                        id,
                        method = %method,
                        panic = panic_message(&*panic),
                        "handler panicked"
                    ),
                }
            }
            .in_current_span(),
        );
        Ok(())
    }

    async fn route_chunk(&self, chunk: PayloadChunk) -> Result<()> {
        let rid = chunk.rid;
        let sender = {
            let mut call = self
                .inflight
                .get_mut(&rid)
                .ok_or(RpcError::UnknownRequestId(rid))?;
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
            self.inflight.remove(&rid);
        }
        // A full queue must not hold the read loop past close or shutdown;
        // the loop observes either on its next turn.
        tokio::select! {
            biased;
            _ = self.close.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
            _ = sender.send(chunk) => {}
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
