//! Liveness probing over the reserved `$ping` method.
//!
//! A [`Ping`] travels as the single payload chunk of a `$ping` request and the
//! server echoes its id back in a [`Pong`].

use std::time::Duration;

use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};
use wirerpc_frame::{decode_message, encode_message, Code, Ping, Pong, Request, Response, PING_METHOD};

use crate::client::RequestWriter;
use crate::config::KeepaliveConfig;
use crate::context::{RequestReader, ResponseWriter};
use crate::error::{Result, RpcError};
use crate::router::{BoxFuture, Handler};

/// Send one Ping with `id` and wait up to `timeout` for the matching Pong.
///
/// Returns the round-trip time. A timed-out probe leaves its correlation
/// record behind until the connection closes.
pub async fn ping_once(writer: &RequestWriter, id: u64, timeout: Duration) -> Result<Duration> {
    let started = Instant::now();
    let body = Bytes::from(encode_message(&Ping { id })?);
    let (response, body) = writer
        .call_timeout(Request::new(PING_METHOD), Some(body), timeout)
        .await?;

    if !response.code.is_success() {
        return Err(RpcError::PingFailed {
            code: response.code,
            message: response.message,
        });
    }
    let pong: Pong = decode_message(&body)?;
    if pong.id != id {
        return Err(RpcError::PingMismatch {
            expected: id,
            got: pong.id,
        });
    }
    Ok(started.elapsed())
}

/// Periodic keepalive prober.
pub struct Pinger {
    writer: RequestWriter,
    config: KeepaliveConfig,
    next_id: u64,
}

impl Pinger {
    pub fn new(writer: RequestWriter, config: KeepaliveConfig) -> Self {
        Self {
            writer,
            config,
            next_id: 0,
        }
    }

    /// Probe every `interval` until a probe fails or the connection closes,
    /// and return the error that stopped it.
    pub async fn run(mut self) -> RpcError {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; wait a full interval before probing.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.writer.closed() => return self.writer.closed_error(),
                _ = ticker.tick() => {}
            }

            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            match ping_once(&self.writer, id, self.config.timeout).await {
                Ok(rtt) => tracing::trace!(id, rtt_us = rtt.as_micros() as u64, "keepalive pong"),
                Err(err) => return err,
            }
        }
    }
}

/// Server handler for `$ping`: answers every Ping with a Pong carrying its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

impl PingHandler {
    async fn pong(mut request: RequestReader, mut response: ResponseWriter) -> Result<()> {
        let body = request.read_to_end().await?;
        let ping: Ping = match decode_message(&body) {
            Ok(ping) => ping,
            Err(err) => {
                return response
                    .write_response(Response::error(Code::ReqBadParams, format!("invalid ping: {err}")))
                    .await;
            }
        };
        let pong = Bytes::from(encode_message(&Pong { id: ping.id })?);
        response.reply(Response::ok(), Some(pong)).await
    }
}

impl Handler for PingHandler {
    fn call(&self, request: RequestReader, response: ResponseWriter) -> BoxFuture<Result<()>> {
        Box::pin(Self::pong(request, response))
    }
}
