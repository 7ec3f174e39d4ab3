use std::sync::Arc;
use std::time::Duration;

use wirerpc_frame::Code;

/// Errors that can occur on a wirerpc connection.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] wirerpc_transport::TransportError),

    /// Frame-level error (including stream I/O).
    #[error("frame error: {0}")]
    Frame(#[from] wirerpc_frame::FrameError),

    /// The peer broke the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A Response or Payload frame referenced an id with no live record.
    #[error("unknown correlation id {0}")]
    UnknownRequestId(u64),

    /// A Request named a method the router does not know.
    #[error("method '{0}' not found")]
    MethodNotFound(String),

    /// A request with this id is already in flight on the connection.
    #[error("request id {0} already in flight")]
    DuplicateRequestId(u64),

    /// A payload stream was used out of order.
    #[error("payload misuse: {0}")]
    PayloadMisuse(&'static str),

    /// A handler tried to answer the same request twice.
    #[error("response already written for request {0}")]
    ResponseAlreadyWritten(u64),

    /// The connection is closed; carries the error that closed it.
    #[error("connection closed: {0}")]
    Closed(Arc<RpcError>),

    /// The connection was closed by its local owner.
    #[error("connection closed locally")]
    LocalClose,

    /// The server is shutting down.
    #[error("server shut down")]
    ServerShutdown,

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A Pong echoed a different id than the Ping carried.
    #[error("pong id {got} does not match ping id {expected}")]
    PingMismatch { expected: u64, got: u64 },

    /// The peer answered a Ping with a non-success code.
    #[error("ping failed with code {code}: {message}")]
    PingFailed { code: Code, message: String },

    /// The login handshake was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
}

impl RpcError {
    /// True when the error means the peer went away at a frame boundary.
    pub fn is_disconnect(&self) -> bool {
        match self {
            RpcError::Frame(wirerpc_frame::FrameError::ConnectionClosed) => true,
            RpcError::Closed(inner) => inner.is_disconnect(),
            _ => false,
        }
    }

    /// True when this side closed the connection on purpose.
    pub fn is_local_close(&self) -> bool {
        match self {
            RpcError::LocalClose | RpcError::ServerShutdown => true,
            RpcError::Closed(inner) => inner.is_local_close(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
