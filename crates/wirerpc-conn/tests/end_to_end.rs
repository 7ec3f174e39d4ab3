use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use wirerpc_conn::{
    login, ping_once, AuthHandler, Client, ConnConfig, KeepaliveConfig, PingHandler,
    RequestReader, ResponseWriter, Router, RpcError, Server, ServerConfig,
};
use wirerpc_frame::{
    decode_message, encode_message, AuthData, Code, CompressType, Compressor, Compressors, Ping,
    Pong, Request, Response, AUTH_METHOD, PING_METHOD,
};
use wirerpc_transport::{Endpoint, TcpSocketListener};

type Serving = JoinHandle<wirerpc_conn::Result<()>>;

async fn echo(mut req: RequestReader, mut resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    let body = req.read_to_end().await?;
    let has_payload = req.request().has_payload;
    let response = Response::ok()
        .with_message("ok")
        .with_compress(req.request().compress_type);
    resp.reply(response, has_payload.then_some(body)).await
}

/// Reports how the request payload arrived, then answers in two chunks.
async fn chunks(mut req: RequestReader, mut resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    let mut indices = Vec::new();
    let mut body = Vec::new();
    while let Some(chunk) = req.payload().await? {
        indices.push(chunk.index.to_string());
        body.extend_from_slice(&chunk.data);
    }
    let summary = format!("{}|{}", indices.join(","), String::from_utf8_lossy(&body));

    resp.write_response(Response::ok().with_message(summary).with_payload())
        .await?;
    resp.write_chunk(&b"AB"[..], true).await?;
    resp.write_chunk(&b"CD"[..], false).await
}

/// Sleeps for the number of milliseconds in the payload, then echoes it.
async fn delayed(mut req: RequestReader, mut resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    let body = req.read_to_end().await?;
    let millis: u64 = String::from_utf8_lossy(&body).parse().unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(millis)).await;
    resp.reply(Response::ok(), Some(body)).await
}

async fn stall(_req: RequestReader, _resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

async fn boom(_req: RequestReader, _resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    panic!("handler exploded");
}

async fn whoami(req: RequestReader, mut resp: ResponseWriter) -> wirerpc_conn::Result<()> {
    let identity = req.session().identity().unwrap_or_default();
    resp.write_response(Response::ok().with_message(identity)).await
}

/// Answers every Ping with the wrong id.
async fn off_by_one_pong(
    mut req: RequestReader,
    mut resp: ResponseWriter,
) -> wirerpc_conn::Result<()> {
    let ping: Ping = decode_message(&req.read_to_end().await?)?;
    let pong = encode_message(&Pong { id: ping.id + 1 })?;
    resp.reply(Response::ok(), Some(pong.into())).await
}

fn router() -> Router {
    let mut router = Router::new();
    router
        .register("echo", echo)
        .register("chunks", chunks)
        .register("delayed", delayed)
        .register("stall", stall)
        .register("boom", boom)
        .register(PING_METHOD, PingHandler)
        .register(AUTH_METHOD, AuthHandler::token("s3cret"))
        .register_guarded("whoami", whoami);
    router
}

async fn connect(router: Router) -> (Client, Server, Serving) {
    connect_with(router, ConnConfig::default(), ServerConfig::default()).await
}

async fn connect_with(
    router: Router,
    client_config: ConnConfig,
    server_config: ServerConfig,
) -> (Client, Server, Serving) {
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let server = Server::with_config(router, server_config);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve_connection(server_io, "duplex").await })
    };
    let client = Client::from_stream(client_io, client_config).await.unwrap();
    (client, server, serving)
}

fn assert_closed_by(err: &RpcError, check: impl Fn(&RpcError) -> bool) {
    match err {
        RpcError::Closed(inner) => assert!(check(inner), "unexpected terminal error {inner:?}"),
        other => panic!("expected closed connection, got {other:?}"),
    }
}

struct Reverse;

impl Compressor for Reverse {
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.iter().rev().copied().collect())
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        self.compress(data)
    }
}

#[tokio::test]
async fn echo_preserves_request_id() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let request = Request::new("echo").with_id(7).with_payload();
    let (mut payload, mut reader) = writer.write(request).await.unwrap();
    payload.write_all(&b"hello"[..]).await.unwrap();

    let response = reader.response().await.unwrap();
    assert_eq!(response.code, Code::Success);
    assert_eq!(response.request_id, 7);
    assert!(response.has_payload);
    assert_eq!(reader.read_to_end().await.unwrap().as_ref(), b"hello");
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test]
async fn request_without_payload_gets_bare_response() {
    let (client, _server, _serving) = connect(router()).await;
    let (response, body) = client
        .open()
        .call(Request::new("echo").with_id(7), None)
        .await
        .unwrap();

    assert_eq!(response.code, Code::Success);
    assert_eq!(response.request_id, 7);
    assert_eq!(response.message, "ok");
    assert!(!response.has_payload);
    assert!(body.is_empty());
}

#[tokio::test]
async fn chunked_payloads_arrive_in_order_both_ways() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let (mut payload, mut reader) = writer
        .write(Request::new("chunks").with_payload())
        .await
        .unwrap();
    payload.write_chunk(&b"ab"[..], true).await.unwrap();
    payload.write_chunk(&b"cd"[..], false).await.unwrap();

    let response = reader.response().await.unwrap();
    assert_eq!(response.message, "0,1|abcd");

    let first = reader.payload().await.unwrap().unwrap();
    let second = reader.payload().await.unwrap().unwrap();
    assert_eq!((first.index, first.more, first.data.as_ref()), (0, true, &b"AB"[..]));
    assert_eq!((second.index, second.more, second.data.as_ref()), (1, false, &b"CD"[..]));
    assert!(reader.payload().await.unwrap().is_none());
}

#[tokio::test]
async fn streamed_source_reassembles() {
    let config = ConnConfig::default().with_chunk_size(3);
    let (client, _server, _serving) = connect_with(router(), config, ServerConfig::default()).await;

    let source = std::io::Cursor::new(b"abcdefgh".to_vec());
    let (_payload, mut reader) = client
        .open()
        .write_with_payload(Request::new("chunks"), source)
        .await
        .unwrap();

    let response = reader.response().await.unwrap();
    assert_eq!(response.message, "0,1,2|abcdefgh");
}

#[tokio::test]
async fn auto_assigned_ids_are_distinct() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let (first, _) = writer.call(Request::new("echo"), None).await.unwrap();
    let (second, _) = writer.call(Request::new("echo"), None).await.unwrap();
    assert_ne!(first.request_id, 0);
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn duplicate_in_flight_id_rejected() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let _stalled = writer.write(Request::new("stall").with_id(5)).await.unwrap();
    let err = writer
        .write(Request::new("stall").with_id(5))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RpcError::DuplicateRequestId(5)));
}

#[tokio::test]
async fn concurrent_calls_complete_out_of_order() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let mut calls = Vec::new();
    for i in 0..20u64 {
        let writer = writer.clone();
        calls.push(tokio::spawn(async move {
            let delay = (20 - i) * 3;
            let body = Bytes::from(delay.to_string());
            let (response, echoed) = writer
                .call(Request::new("delayed"), Some(body.clone()))
                .await
                .unwrap();
            assert!(response.code.is_success());
            assert_eq!(echoed, body);
        }));
    }
    for call in calls {
        call.await.unwrap();
    }
    assert_eq!(client.outstanding(), 0);
}

#[tokio::test]
async fn ping_roundtrip() {
    let (client, _server, _serving) = connect(router()).await;
    let rtt = ping_once(&client.open(), 0, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(rtt < Duration::from_secs(1));
}

#[tokio::test]
async fn ping_with_wrong_pong_id_is_mismatch() {
    let mut router = Router::new();
    router.register(PING_METHOD, off_by_one_pong);
    let (client, _server, _serving) = connect(router).await;

    let err = ping_once(&client.open(), 0, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::PingMismatch { expected: 0, got: 1 }));
}

#[tokio::test]
async fn ping_to_silent_peer_times_out() {
    let mut router = Router::new();
    router.register(PING_METHOD, stall);
    let (client, _server, _serving) = connect(router).await;

    let err = ping_once(&client.open(), 0, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)));
}

#[tokio::test]
async fn guarded_method_requires_login() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let (before, _) = writer.call(Request::new("whoami"), None).await.unwrap();
    assert_eq!(before.code, Code::ReqNoAuth);

    let err = login(&writer, &AuthData::new("alice", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::AuthFailed(ref reason) if reason == "invalid credential"));

    login(&writer, &AuthData::new("alice", "s3cret")).await.unwrap();
    let (after, _) = writer.call(Request::new("whoami"), None).await.unwrap();
    assert_eq!(after.code, Code::Success);
    assert_eq!(after.message, "alice");
}

#[tokio::test]
async fn malformed_auth_data_is_bad_params() {
    let (client, _server, _serving) = connect(router()).await;
    let (response, _) = client
        .open()
        .call(Request::new(AUTH_METHOD), Some(Bytes::from_static(b"\xc1")))
        .await
        .unwrap();
    assert_eq!(response.code, Code::ReqBadParams);
}

#[tokio::test]
async fn unknown_method_closes_connection() {
    let (client, _server, serving) = connect(router()).await;
    let (_payload, mut reader) = client.open().write(Request::new("nope")).await.unwrap();

    let err = reader.response().await.unwrap_err();
    assert_closed_by(&err, RpcError::is_disconnect);

    let served = serving.await.unwrap().unwrap_err();
    assert_closed_by(&served, |inner| {
        matches!(inner, RpcError::MethodNotFound(method) if method == "nope")
    });
}

#[tokio::test]
async fn unsupported_compression_answered_without_closing() {
    let compressors = Compressors::new().with(CompressType::Gzip, Arc::new(Reverse));
    let config = ConnConfig::default().with_compressors(compressors);
    let (client, _server, _serving) = connect_with(router(), config, ServerConfig::default()).await;
    let writer = client.open();

    let request = Request::new("echo").with_compress(CompressType::Gzip);
    let (response, body) = writer
        .call(request, Some(Bytes::from_static(b"xyz")))
        .await
        .unwrap();
    assert_eq!(response.code, Code::ReqUnknownCompressType);
    assert!(body.is_empty());

    let (response, body) = writer
        .call(Request::new("echo"), Some(Bytes::from_static(b"still here")))
        .await
        .unwrap();
    assert!(response.code.is_success());
    assert_eq!(body.as_ref(), b"still here");
}

#[tokio::test]
async fn compressed_payloads_roundtrip() {
    let compressors = Compressors::new().with(CompressType::Gzip, Arc::new(Reverse));
    let config = ConnConfig::default().with_compressors(compressors);
    let server_config = ServerConfig::default().with_conn_config(config.clone());
    let (client, _server, _serving) = connect_with(router(), config, server_config).await;

    let request = Request::new("echo").with_compress(CompressType::Gzip);
    let (response, body) = client
        .open()
        .call(request, Some(Bytes::from_static(b"packed")))
        .await
        .unwrap();
    assert_eq!(response.compress_type, CompressType::Gzip);
    assert_eq!(body.as_ref(), b"packed");
}

#[tokio::test]
async fn handler_panic_keeps_connection_usable() {
    let (client, _server, _serving) = connect(router()).await;
    let writer = client.open();

    let err = writer
        .call_timeout(Request::new("boom"), None, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)));

    let (response, _) = writer.call(Request::new("echo"), None).await.unwrap();
    assert!(response.code.is_success());
    assert!(!client.is_closed());
}

#[tokio::test]
async fn local_close_fails_waiting_calls() {
    let (client, _server, serving) = connect(router()).await;
    let closes = Arc::new(AtomicUsize::new(0));
    {
        let closes = closes.clone();
        client.on_close(move |err| {
            assert!(matches!(err, RpcError::LocalClose));
            closes.fetch_add(1, Ordering::SeqCst);
        });
    }

    let writer = client.open();
    let (_payload, mut reader) = writer.write(Request::new("stall")).await.unwrap();
    let waiter = tokio::spawn(async move { reader.response().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.close();
    client.close();

    let err = waiter.await.unwrap().unwrap_err();
    assert_closed_by(&err, |inner| matches!(inner, RpcError::LocalClose));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(matches!(
        *client.terminal_error().unwrap(),
        RpcError::LocalClose
    ));

    let late = writer.write(Request::new("echo")).await.err().unwrap();
    assert_closed_by(&late, |inner| matches!(inner, RpcError::LocalClose));

    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn server_shutdown_reaches_client() {
    let (client, server, serving) = connect(router()).await;
    let (_payload, mut reader) = client.open().write(Request::new("stall")).await.unwrap();
    let waiter = tokio::spawn(async move { reader.payload().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    server.shutdown();
    serving.await.unwrap().unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::Closed(_)));
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .unwrap();
    assert!(client.terminal_error().unwrap().is_disconnect());
}

#[tokio::test]
async fn keepalive_holds_healthy_connection_open() {
    let (client, _server, _serving) = connect(router()).await;
    let keepalive = client.spawn_keepalive(KeepaliveConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(500),
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!client.is_closed());

    client.close();
    tokio::time::timeout(Duration::from_secs(1), keepalive)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn keepalive_failure_closes_connection() {
    let mut router = Router::new();
    router.register(PING_METHOD, off_by_one_pong);
    let (client, _server, _serving) = connect(router).await;

    client.spawn_keepalive(KeepaliveConfig {
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(500),
    });
    tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .unwrap();
    assert!(matches!(
        *client.terminal_error().unwrap(),
        RpcError::PingMismatch { expected: 0, got: 1 }
    ));
}

#[tokio::test]
async fn serve_over_tcp_listener() {
    let listener = TcpSocketListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::parse(&format!("tcp://{}", listener.socket_addr())).unwrap();
    let server = Server::new(router());
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(&listener).await })
    };

    let client = Client::connect(&endpoint, ConnConfig::default())
        .await
        .unwrap();
    let (response, body) = client
        .open()
        .call(Request::new("echo"), Some(Bytes::from_static(b"over tcp")))
        .await
        .unwrap();
    assert!(response.code.is_success());
    assert_eq!(body.as_ref(), b"over tcp");
    assert_eq!(server.active_connections(), 1);

    server.shutdown();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn connection_limit_holds_under_concurrent_connects() {
    let listener = TcpSocketListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::parse(&format!("tcp://{}", listener.socket_addr())).unwrap();
    let server = Server::with_config(router(), ServerConfig::default().with_max_connections(1));
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(&listener).await })
    };

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let endpoint = endpoint.clone();
            tokio::spawn(async move { Client::connect(&endpoint, ConnConfig::default()).await })
        })
        .collect();
    let mut connected = Vec::new();
    for attempt in attempts {
        if let Ok(client) = attempt.await.unwrap() {
            connected.push(client);
        }
    }

    assert_eq!(connected.len(), 1);
    assert_eq!(server.active_connections(), 1);
    server.shutdown();
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_reaches_connection_blocked_on_full_chunk_queue() {
    let server_config =
        ServerConfig::default().with_conn_config(ConnConfig::default().with_chunk_queue_capacity(1));
    let (client, server, serving) = connect_with(router(), ConnConfig::default(), server_config).await;

    // The handler never reads, so the second chunk leaves the read loop waiting.
    let (mut payload, _reader) = client
        .open()
        .write(Request::new("stall").with_payload())
        .await
        .unwrap();
    for _ in 0..3 {
        payload.write_chunk(&b"chunk"[..], true).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.active_connections(), 1);

    server.shutdown();
    tokio::time::timeout(Duration::from_secs(2), serving)
        .await
        .expect("connection still running after shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(server.active_connections(), 0);
}
