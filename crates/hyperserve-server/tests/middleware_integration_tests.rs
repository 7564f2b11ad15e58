//! End-to-end middleware tests over a real listener.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use hyperserve_server::handler::{HttpHandler, HttpRequest, text_response};
use hyperserve_server::middleware::Middleware;
use hyperserve_server::{Server, ServerBuilder};

/// Middleware recording its name on every invocation
struct Tracer {
    name: &'static str,
    trace: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Tracer {
    fn name(&self) -> &str {
        self.name
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        let name = self.name;
        let trace = self.trace.clone();
        Arc::new(move |req: HttpRequest| {
            trace.lock().unwrap().push(name.to_string());
            next(req)
        })
    }
}

/// Collects formatted log messages for assertion
#[derive(Clone, Default)]
struct LogSink {
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor(Option<String>);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogSink {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.messages.lock().unwrap().push(message);
        }
    }
}

async fn start(server: &Server) -> (String, tokio::task::JoinHandle<()>) {
    let runner = {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.running() || !server.ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server failed to start");
    (server.options().addr.clone(), runner)
}

async fn raw_request(addr: &str, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => {
                response.extend_from_slice(&buf[..n]);
                if response.windows(4).any(|w| w == b"\r\n\r\n") {
                    // Headers complete; the test bodies are tiny, read once more.
                    if let Ok(Ok(n)) =
                        tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf))
                            .await
                    {
                        response.extend_from_slice(&buf[..n]);
                    }
                    break;
                }
            }
            Ok(Err(_)) => break,
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_chain_order_over_http() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let server = ServerBuilder::new().addr(free_addr()).build();
    server.add_middleware(
        "/api/v1/",
        Arc::new(Tracer {
            name: "v1",
            trace: trace.clone(),
        }),
    );
    server.add_middleware(
        "*",
        Arc::new(Tracer {
            name: "global",
            trace: trace.clone(),
        }),
    );
    server.add_middleware(
        "/api/",
        Arc::new(Tracer {
            name: "api",
            trace: trace.clone(),
        }),
    );
    server.handle_fn("/api/v1/items", |_req| async {
        text_response(StatusCode::OK, "items")
    });

    let (addr, _runner) = start(&server).await;
    let response = raw_request(&addr, &get("/api/v1/items")).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["global", "api", "v1"],
        "globals wrap outermost, longer prefixes closest to the handler"
    );

    server.stop().await;
}

#[tokio::test]
async fn test_no_middleware_logging_at_request_time() {
    let sink = LogSink::default();
    let subscriber = tracing_subscriber::registry().with(sink.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let trace = Arc::new(Mutex::new(Vec::new()));
    let server = ServerBuilder::new().addr(free_addr()).build();
    server.add_default_middleware();
    server.add_middleware(
        "*",
        Arc::new(Tracer {
            name: "traced",
            trace,
        }),
    );
    server.handle_fn("/ping", |_req| async {
        text_response(StatusCode::OK, "pong")
    });

    let registration_logs = sink.messages.lock().unwrap().len();
    assert!(registration_logs > 0, "registration must log");

    let (addr, _runner) = start(&server).await;
    sink.messages.lock().unwrap().clear();

    for _ in 0..3 {
        raw_request(&addr, &get("/ping")).await;
    }

    let request_time = sink.messages.lock().unwrap().clone();
    for message in &request_time {
        assert!(
            !message.contains("registered") && !message.contains("enabled"),
            "request-time log leaked a registration message: {message}"
        );
    }

    server.stop().await;
}

#[tokio::test]
async fn test_rate_limit_burst_over_http() {
    let server = ServerBuilder::new()
        .addr(free_addr())
        .rate_limit(10.0, 20)
        .build();
    server.handle_fn("/limited", |_req| async {
        text_response(StatusCode::OK, "ok")
    });

    let (addr, _runner) = start(&server).await;

    let request =
        "GET /limited HTTP/1.1\r\nHost: localhost\r\nX-Forwarded-For: 203.0.113.5\r\nConnection: close\r\n\r\n"
            .to_string();
    let mut statuses = Vec::new();
    for _ in 0..21 {
        let response = raw_request(&addr, &request).await;
        statuses.push(response.lines().next().unwrap_or_default().to_string());
    }
    assert!(statuses[..20].iter().all(|s| s.contains("200")), "{statuses:?}");
    assert!(statuses[20].contains("429"), "{statuses:?}");

    server.stop().await;
}

#[tokio::test]
async fn test_hardened_mode_sets_security_headers() {
    let server = ServerBuilder::new().addr(free_addr()).hardened(true).build();
    server.handle_fn("/page", |_req| async {
        text_response(StatusCode::OK, "<html></html>")
    });

    let (addr, _runner) = start(&server).await;
    let response = raw_request(&addr, &get("/page")).await;
    assert!(response.contains("x-content-type-options: nosniff"));
    assert!(response.contains("x-frame-options: DENY"));

    server.stop().await;
}

#[tokio::test]
async fn test_deferred_init_gate_over_http() {
    let release = Arc::new(tokio::sync::Notify::new());
    let gate = release.clone();
    let server = ServerBuilder::new()
        .addr(free_addr())
        .deferred_init(false, move |_server| {
            let gate = gate.clone();
            Box::pin(async move {
                gate.notified().await;
                Ok(())
            })
        })
        .build();
    server.handle_fn("/anything", |_req| async {
        text_response(StatusCode::OK, "handler response")
    });

    let runner = {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.run().await;
        })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let addr = server.options().addr.clone();

    let response = raw_request(&addr, &get("/anything")).await;
    assert!(response.starts_with("HTTP/1.1 503"));
    assert!(response.contains("service initializing"));

    let response = raw_request(&addr, &get("/healthz")).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("ok"));

    release.notify_one();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !server.ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let response = raw_request(&addr, &get("/anything")).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("handler response"));

    server.stop().await;
    let _ = runner.await;
}
