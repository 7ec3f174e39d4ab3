//! Multiplexed request/response RPC over a single byte stream.
//!
//! Many concurrent calls share one connection: each Request carries an id,
//! Responses and streamed payload chunks carry it back, and a single write
//! queue per connection keeps frames whole on the wire.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints, listeners and streams (TCP, Unix sockets)
//! - [`frame`]: preamble, frame header, message types and codecs
//! - [`conn`]: client multiplexer, server dispatcher, auth and keepalive

/// Re-export transport types.
pub mod transport {
    pub use wirerpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use wirerpc_frame::*;
}

/// Re-export connection types.
pub mod conn {
    pub use wirerpc_conn::*;
}

pub use wirerpc_conn::{
    login, AuthHandler, Client, ConnConfig, PingHandler, RequestReader, RequestWriter,
    ResponseReader, ResponseWriter, Router, RpcError, Server, ServerConfig,
};
pub use wirerpc_frame::{Code, Request, Response};
pub use wirerpc_transport::Endpoint;
