//! WebSocket upgrades through the kernel's middleware chain.
//!
//! The middleware contract requires request extensions (and with them the
//! hijack capability) to pass through untouched; this drives a real upgrade
//! with logging, recovery and an interceptor in the path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use hyperserve_server::handler::empty_body;
use hyperserve_server::interceptor::{
    InterceptError, InterceptedRequest, InterceptedResponse, Interceptor,
};
use hyperserve_server::{Server, ServerBuilder};
use hyperserve_websocket::{Conn, DEFAULT_MAX_MESSAGE_SIZE, Opcode, Upgrader};

const HANDSHAKE: &str = "GET /ws HTTP/1.1\r\n\
Host: example.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
Origin: http://example.com\r\n\r\n";

/// Interceptor that only tags metadata; upgrade requests must survive it
struct Tagger;

#[async_trait]
impl Interceptor for Tagger {
    fn name(&self) -> &str {
        "tagger"
    }

    async fn intercept_request(
        &self,
        req: &mut InterceptedRequest,
    ) -> Result<Option<InterceptedResponse>, InterceptError> {
        req.set_metadata("seen", serde_json::json!(true));
        Ok(None)
    }

    async fn intercept_response(
        &self,
        _req: &InterceptedRequest,
        _resp: &mut InterceptedResponse,
    ) -> Result<(), InterceptError> {
        Ok(())
    }
}

fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn start(server: &Server) -> String {
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.running() || !server.ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    server.options().addr.clone()
}

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
async fn test_upgrade_survives_middleware_and_interceptors() {
    let server = ServerBuilder::new().addr(free_addr()).build();
    server.add_default_middleware();
    server.add_interceptor(Arc::new(Tagger));

    let upgrader = Arc::new(Upgrader::new());
    server.handle_fn("/ws", move |req| {
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
                    response.map(|()| empty_body())
                }
                Err(e) => http::Response::builder()
                    .status(e.status())
                    .body(empty_body())
                    .unwrap(),
            }
        }
    });

    let addr = start(&server).await;
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.write_all(HANDSHAKE.as_bytes()).await.unwrap();

    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101"), "head: {head}");
    assert!(head.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), "head: {head}");

    let client = Conn::client(stream, DEFAULT_MAX_MESSAGE_SIZE);
    client.write_text("through the chain").await.unwrap();
    let (opcode, payload) = tokio::time::timeout(Duration::from_secs(5), client.read_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opcode, Opcode::Text);
    assert_eq!(&payload[..], b"through the chain");

    server.stop().await;
}
