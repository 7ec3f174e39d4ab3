//! Byte-stream boundary for wirerpc.
//!
//! The multiplexing core only needs something that reads, writes and closes.
//! This crate names that requirement ([`RpcStream`]) and provides the two
//! stock ways to obtain one:
//! - TCP sockets
//! - Unix domain sockets (Linux/macOS)
//!
//! [`Endpoint`] parses the address syntax used by the CLI and examples.

pub mod endpoint;
pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use tcp::TcpSocketListener;
pub use traits::{Accepted, BoxStream, Listener, RpcStream};

#[cfg(unix)]
pub use uds::UnixSocketListener;
