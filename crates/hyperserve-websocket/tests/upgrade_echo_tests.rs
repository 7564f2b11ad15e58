//! End-to-end handshake and echo over a real hyper connection.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hyperserve_websocket::{DEFAULT_MAX_MESSAGE_SIZE, Conn, Opcode, Upgrader};

const HANDSHAKE: &str = "GET /ws HTTP/1.1\r\n\
Host: example.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
Origin: http://example.com\r\n\r\n";

async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        let upgrader = Arc::new(Upgrader::new());
        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
            let upgrader = upgrader.clone();
            async move {
                match upgrader.upgrade(req) {
                    Ok((response, conn_future)) => {
                        tokio::spawn(async move {
                            let conn = conn_future.await.expect("upgrade should resolve");
                            while let Ok((opcode, payload)) = conn.read_message().await {
                                if conn.write_message(opcode, payload).await.is_err() {
                                    break;
                                }
                            }
                        });
                        Ok::<_, Infallible>(response.map(|()| Empty::<Bytes>::new()))
                    }
                    Err(e) => Ok(hyper::Response::builder()
                        .status(e.status())
                        .body(Empty::new())
                        .unwrap()),
                }
            }
        });
        let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await;
    });

    addr
}

/// Read the HTTP response head byte-by-byte so no frame bytes are consumed
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("handshake timed out")
            .unwrap();
        assert!(n > 0, "connection closed during handshake");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn test_upgrade_and_echo() {
    let addr = spawn_echo_server().await;

    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(HANDSHAKE.as_bytes()).await.unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "head: {head}");
    assert!(
        head.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="),
        "accept key missing: {head}"
    );

    let client = Conn::client(stream, DEFAULT_MAX_MESSAGE_SIZE);
    client.write_text("hi").await.unwrap();
    let (opcode, payload) = tokio::time::timeout(Duration::from_secs(5), client.read_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opcode, Opcode::Text);
    assert_eq!(&payload[..], b"hi");
}

#[tokio::test]
async fn test_cross_origin_upgrade_rejected_with_403() {
    let addr = spawn_echo_server().await;

    let handshake = HANDSHAKE.replace("Origin: http://example.com", "Origin: http://evil.test");
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(handshake.as_bytes()).await.unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 403"), "head: {head}");
}
