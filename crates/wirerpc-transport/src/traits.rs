use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A connected bidirectional byte stream.
///
/// Anything tokio can read from and write to qualifies: TCP and Unix sockets,
/// TLS wrappers, or an in-memory `tokio::io::duplex` pair in tests.
/// Closing is dropping (or `shutdown()` on the write half).
pub trait RpcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RpcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased stream handed out by listeners and [`crate::Endpoint::connect`].
pub type BoxStream = Box<dyn RpcStream>;

/// A freshly accepted connection.
pub struct Accepted {
    /// The connected stream.
    pub stream: BoxStream,
    /// Human-readable peer address, used in log fields.
    pub peer: String,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").field("peer", &self.peer).finish()
    }
}

/// Boxed future returned by [`Listener::accept`].
pub type AcceptFuture<'a> = Pin<Box<dyn Future<Output = Result<Accepted>> + Send + 'a>>;

/// Source of inbound connections for the server dispatcher.
pub trait Listener: Send + Sync {
    /// Wait for the next inbound connection.
    fn accept(&self) -> AcceptFuture<'_>;

    /// Address the listener is bound to, for diagnostics.
    fn local_addr(&self) -> String;
}
