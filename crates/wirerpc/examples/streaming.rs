//! Streams a payload to an in-process server in small chunks and reads the
//! answer back chunk by chunk, all over one in-memory connection.
//!
//! Run with:
//!   cargo run --example streaming

use bytes::Bytes;
use wirerpc::{Client, ConnConfig, Request, RequestReader, Response, ResponseWriter, Router, Server};

/// Upper-cases every chunk as it arrives and streams it straight back.
async fn shout(mut request: RequestReader, mut response: ResponseWriter) -> wirerpc::conn::Result<()> {
    response
        .write_response(Response::ok().with_payload())
        .await?;
    while let Some(chunk) = request.payload().await? {
        let upper = Bytes::from(chunk.data.to_ascii_uppercase());
        response.write_chunk(upper, chunk.more).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut router = Router::new();
    router.register("shout", shout);
    let server = Server::new(router);

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve_connection(server_io, "in-memory").await })
    };

    let client = Client::from_stream(client_io, ConnConfig::default().with_chunk_size(8)).await?;
    let source = std::io::Cursor::new(b"the quick brown fox jumps over the lazy dog".to_vec());
    let (_payload, mut reader) = client
        .open()
        .write_with_payload(Request::new("shout"), source)
        .await?;

    let head = reader.response().await?;
    println!("response: code={} request_id={}", head.code, head.request_id);
    while let Some(chunk) = reader.payload().await? {
        println!(
            "chunk {:>2} more={:<5} {:?}",
            chunk.index,
            chunk.more,
            String::from_utf8_lossy(&chunk.data)
        );
    }

    client.close();
    serving.await??;
    Ok(())
}
