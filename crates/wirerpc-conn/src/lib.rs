//! Multiplexed request/response connections.
//!
//! A [`Client`] issues requests over one stream and matches Response and
//! Payload frames back to their calls by id; a [`Server`] decodes requests,
//! dispatches them through a [`Router`] and runs each handler concurrently.
//! Both sides send every frame through a single [`WriteQueue`] and share one
//! teardown path, so the first error that closes a connection is the error
//! every waiting call sees.

pub mod auth;
pub mod client;
mod close;
pub mod config;
pub mod context;
pub mod error;
mod handshake;
pub mod payload;
pub mod ping;
pub mod queue;
pub mod router;
pub mod server;

pub use auth::{login, AuthHandler};
pub use client::{Client, RequestWriter, ResponseReader};
pub use config::{ConnConfig, KeepaliveConfig, ServerConfig};
pub use context::{RequestReader, ResponseWriter, Session};
pub use error::{Result, RpcError};
pub use payload::PayloadWriter;
pub use ping::{ping_once, PingHandler, Pinger};
pub use queue::WriteQueue;
pub use router::{BoxFuture, Handler, Router};
pub use server::Server;
