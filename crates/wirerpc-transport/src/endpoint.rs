use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};
use crate::tcp::TcpSocketListener;
use crate::traits::{BoxStream, Listener};

/// Where to listen or connect.
///
/// Accepted forms: `host:port`, `tcp://host:port`, `unix:/path/to.sock`
/// (also `unix:///path/to.sock`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix("unix:") {
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            #[cfg(unix)]
            return Ok(Self::Unix(PathBuf::from(path)));
            #[cfg(not(unix))]
            return Err(TransportError::InvalidEndpoint(input.to_string()));
        }

        let addr = input.strip_prefix("tcp://").unwrap_or(input);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(addr.to_string()))
            }
            _ => Err(TransportError::InvalidEndpoint(input.to_string())),
        }
    }

    /// Bind a listener for this endpoint.
    pub async fn bind(&self) -> Result<Box<dyn Listener>> {
        match self {
            Self::Tcp(addr) => Ok(Box::new(TcpSocketListener::bind(addr).await?)),
            #[cfg(unix)]
            Self::Unix(path) => Ok(Box::new(crate::uds::UnixSocketListener::bind(path)?)),
        }
    }

    /// Connect to this endpoint.
    pub async fn connect(&self) -> Result<BoxStream> {
        match self {
            Self::Tcp(addr) => TcpSocketListener::connect(addr).await,
            #[cfg(unix)]
            Self::Unix(path) => crate::uds::UnixSocketListener::connect(path).await,
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
