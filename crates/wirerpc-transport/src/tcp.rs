use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{AcceptFuture, Accepted, BoxStream, Listener};

/// TCP listener transport.
pub struct TcpSocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocketListener {
    /// Bind and listen on `addr` (`host:port`; port `0` picks a free port).
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                endpoint: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Connect to a listening TCP endpoint.
    pub async fn connect(addr: &str) -> Result<BoxStream> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect {
                endpoint: addr.to_string(),
                source: e,
            })?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected over tcp");
        Ok(Box::new(stream))
    }

    /// The bound socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Listener for TcpSocketListener {
    fn accept(&self) -> AcceptFuture<'_> {
        Box::pin(async move {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(TransportError::Accept)?;
            stream.set_nodelay(true)?;
            debug!(%peer, "accepted tcp connection");
            Ok(Accepted {
                stream: Box::new(stream),
                peer: peer.to_string(),
            })
        })
    }

    fn local_addr(&self) -> String {
        self.local_addr.to_string()
    }
}
