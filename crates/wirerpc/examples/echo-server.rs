//! Minimal echo server on a Unix socket.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- call unix:/tmp/wirerpc-echo-example.sock \
//!     --method echo --data hello

use wirerpc::{Endpoint, RequestReader, Response, ResponseWriter, Router, Server};

async fn echo(mut request: RequestReader, mut response: ResponseWriter) -> wirerpc::conn::Result<()> {
    let body = request.read_to_end().await?;
    eprintln!(
        "request {} ({} bytes) from session {}",
        request.request().id,
        body.len(),
        request.session().id()
    );
    let has_payload = request.request().has_payload;
    response
        .reply(Response::ok().with_message("ok"), has_payload.then_some(body))
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = Endpoint::parse("unix:/tmp/wirerpc-echo-example.sock")?;

    let mut router = Router::new();
    router
        .register("echo", echo)
        .register(wirerpc::frame::PING_METHOD, wirerpc::PingHandler);
    let server = Server::new(router);

    let listener = endpoint.bind().await?;
    eprintln!("Listening on {endpoint}");

    tokio::select! {
        served = server.serve(&*listener) => served?,
        _ = tokio::signal::ctrl_c() => server.shutdown(),
    }
    Ok(())
}
