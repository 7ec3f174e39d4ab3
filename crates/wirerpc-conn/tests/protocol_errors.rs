//! Malformed peers: hand-built frames that must close the connection.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use wirerpc_conn::{Client, ConnConfig, RequestReader, ResponseWriter, Router, RpcError, Server};
use wirerpc_frame::{
    encode_payload, encode_request, encode_response, write_preamble, FrameError, FrameReader,
    Request, Response,
};

/// The far end of a connection, driven frame by frame.
struct RawPeer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    async fn send(&mut self, frame: Bytes) {
        self.writer.write_all(&frame).await.unwrap();
    }
}

async fn client_with_raw_server(config: ConnConfig) -> (Client, RawPeer) {
    let (client_io, peer_io) = tokio::io::duplex(64 * 1024);
    let (read_half, mut writer) = tokio::io::split(peer_io);
    write_preamble(&mut writer).await.unwrap();

    let client = Client::from_stream(client_io, config).await.unwrap();
    let mut reader = FrameReader::new(read_half);
    reader.read_preamble().await.unwrap();
    (client, RawPeer { reader, writer })
}

async fn server_with_raw_client(router: Router) -> (RawPeer, JoinHandle<wirerpc_conn::Result<()>>) {
    let (peer_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = Server::new(router);
    let serving = tokio::spawn(async move { server.serve_connection(server_io, "raw").await });

    let (read_half, mut writer) = tokio::io::split(peer_io);
    write_preamble(&mut writer).await.unwrap();
    let mut reader = FrameReader::new(read_half);
    reader.read_preamble().await.unwrap();
    (RawPeer { reader, writer }, serving)
}

async fn stall(_req: RequestReader, _resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

fn closed_by(err: &RpcError) -> &RpcError {
    match err {
        RpcError::Closed(inner) => inner,
        other => panic!("expected closed connection, got {other:?}"),
    }
}

async fn wait_closed(client: &Client) {
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn response_for_unknown_id_closes_client() {
    let (client, mut peer) = client_with_raw_server(ConnConfig::default()).await;
    let writer = client.open();
    let (_p1, mut first) = writer.write(Request::new("a").with_id(1)).await.unwrap();
    let (_p2, mut second) = writer.write(Request::new("b").with_id(2)).await.unwrap();

    peer.send(encode_response(&Response::ok().with_request_id(99)).unwrap())
        .await;
    wait_closed(&client).await;

    for reader in [&mut first, &mut second] {
        let err = reader.response().await.unwrap_err();
        assert!(matches!(closed_by(&err), RpcError::UnknownRequestId(99)));
    }
    assert!(matches!(
        *client.terminal_error().unwrap(),
        RpcError::UnknownRequestId(99)
    ));
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test]
async fn payload_for_unknown_rid_closes_client() {
    let (client, mut peer) = client_with_raw_server(ConnConfig::default()).await;
    let (_payload, mut reader) = client.open().write(Request::new("a").with_id(1)).await.unwrap();

    peer.send(encode_payload(42, 0, false, b"stray").unwrap()).await;
    wait_closed(&client).await;

    let err = reader.response().await.unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::UnknownRequestId(42)));
}

#[tokio::test]
async fn payload_before_response_closes_client() {
    let (client, mut peer) = client_with_raw_server(ConnConfig::default()).await;
    let (_payload, mut reader) = client.open().write(Request::new("a").with_id(1)).await.unwrap();

    peer.send(encode_payload(1, 0, false, b"early").unwrap()).await;
    wait_closed(&client).await;

    let err = reader.response().await.unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::Protocol(_)));
}

#[tokio::test]
async fn chunk_index_gap_closes_client() {
    let (client, mut peer) = client_with_raw_server(ConnConfig::default()).await;
    let writer = client.open();
    let (_p1, mut streaming) = writer.write(Request::new("a").with_id(1)).await.unwrap();
    let (_p2, mut waiting) = writer.write(Request::new("b").with_id(2)).await.unwrap();

    peer.send(encode_response(&Response::ok().with_request_id(1).with_payload()).unwrap())
        .await;
    peer.send(encode_payload(1, 0, true, b"zero").unwrap()).await;
    peer.send(encode_payload(1, 2, false, b"two").unwrap()).await;
    wait_closed(&client).await;

    assert!(streaming.response().await.unwrap().has_payload);
    let first = streaming.payload().await.unwrap().unwrap();
    assert_eq!(first.data.as_ref(), b"zero");
    let err = streaming.payload().await.unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::Protocol(_)));

    let err = waiting.response().await.unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::Protocol(_)));
}

#[tokio::test]
async fn full_chunk_queue_does_not_outlive_client_close() {
    let config = ConnConfig::default().with_chunk_queue_capacity(1);
    let (client, mut peer) = client_with_raw_server(config).await;
    // The caller holds its reader but never consumes the payload.
    let (_payload, _reader) = client.open().write(Request::new("a").with_id(1)).await.unwrap();

    peer.send(encode_response(&Response::ok().with_request_id(1).with_payload()).unwrap())
        .await;
    for index in 0..3 {
        peer.send(encode_payload(1, index, true, b"chunk").unwrap()).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.close();

    // Once both halves of the client's stream are released, writes fail.
    let released = tokio::time::timeout(Duration::from_secs(2), async {
        let mut index = 3;
        loop {
            let frame = encode_payload(1, index, true, b"more").unwrap();
            if peer.writer.write_all(&frame).await.is_err() {
                break;
            }
            index += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "client read loop still holds the stream");
}

#[tokio::test]
async fn payload_for_unknown_rid_closes_server_connection() {
    let (mut peer, serving) = server_with_raw_client(Router::new()).await;

    peer.send(encode_payload(5, 0, false, b"stray").unwrap()).await;

    let err = serving.await.unwrap().unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::UnknownRequestId(5)));
    assert!(matches!(
        peer.reader.read_frame().await.unwrap_err(),
        FrameError::ConnectionClosed
    ));
}

#[tokio::test]
async fn chunk_index_gap_closes_server_connection() {
    let mut router = Router::new();
    router.register("stall", stall);
    let (mut peer, serving) = server_with_raw_client(router).await;

    peer.send(encode_request(&Request::new("stall").with_id(1).with_payload()).unwrap())
        .await;
    peer.send(encode_payload(1, 0, true, b"zero").unwrap()).await;
    peer.send(encode_payload(1, 2, false, b"two").unwrap()).await;

    let err = serving.await.unwrap().unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::Protocol(_)));
}

#[tokio::test]
async fn response_frame_sent_to_server_closes_connection() {
    let (mut peer, serving) = server_with_raw_client(Router::new()).await;

    peer.send(encode_response(&Response::ok().with_request_id(1)).unwrap())
        .await;

    let err = serving.await.unwrap().unwrap_err();
    assert!(matches!(closed_by(&err), RpcError::Protocol(_)));
}
