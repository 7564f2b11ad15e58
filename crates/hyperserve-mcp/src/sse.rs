//! SSE transport: session-routed JSON-RPC over a unified endpoint.
//!
//! A `GET` with `Accept: text/event-stream` establishes a session with a
//! process-unique client id and a bounded outbound queue. Follow-up `POST`s
//! carrying `X-SSE-Client-ID` are enqueued to the session's request channel
//! and acknowledged with `202 Accepted`; the worker dispatches them in FIFO
//! order and pushes responses as `message` events. Sessions close exactly
//! once, on client disconnect or manager shutdown.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use http::{StatusCode, header};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use hyperserve_jsonrpc::JsonRpcEngine;
use hyperserve_server::handler::{HttpResponse, empty_body, text_response};

/// Default outbound queue bound
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default ping cadence
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Per-client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    /// Stream established, `initialize` not yet acknowledged
    Connected,
    /// Client sent the `initialized` notification
    Initialized,
    /// The synthetic `ready` notification has been emitted
    Ready,
}

/// One SSE session
pub struct SseSession {
    client_id: String,
    out_tx: mpsc::Sender<Bytes>,
    req_tx: mpsc::Sender<Vec<u8>>,
    state: Mutex<SessionLifecycle>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseSession")
            .field("client_id", &self.client_id)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl SseSession {
    /// Process-unique client id
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current lifecycle state
    pub fn lifecycle(&self) -> SessionLifecycle {
        *self.state.lock()
    }
}

/// SSE session manager
pub struct SseManager {
    engine: Arc<JsonRpcEngine>,
    sessions: DashMap<String, Arc<SseSession>>,
    queue_capacity: usize,
    ping_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for SseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseManager")
            .field("sessions", &self.sessions.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// Render one SSE event
fn format_event(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

impl SseManager {
    /// Create a manager with default queue bound and ping cadence
    pub fn new(engine: Arc<JsonRpcEngine>) -> Arc<Self> {
        Self::with_config(engine, DEFAULT_QUEUE_CAPACITY, DEFAULT_PING_INTERVAL)
    }

    /// Create a manager with explicit queue bound and ping cadence
    pub fn with_config(
        engine: Arc<JsonRpcEngine>,
        queue_capacity: usize,
        ping_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            engine,
            sessions: DashMap::new(),
            queue_capacity,
            ping_interval,
            shutdown_tx,
        })
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a session by client id
    pub fn session(&self, client_id: &str) -> Option<Arc<SseSession>> {
        self.sessions.get(client_id).map(|s| s.clone())
    }

    /// Establish a new session and return the streaming response
    pub async fn establish(self: &Arc<Self>) -> HttpResponse {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let client_id = format!("sse-{}-{}", nanos, fastrand::u32(..));

        let (out_tx, out_rx) = mpsc::channel::<Bytes>(self.queue_capacity);
        let (req_tx, req_rx) = mpsc::channel::<Vec<u8>>(self.queue_capacity);

        let session = Arc::new(SseSession {
            client_id: client_id.clone(),
            out_tx,
            req_tx,
            state: Mutex::new(SessionLifecycle::Connected),
            closed: AtomicBool::new(false),
        });
        self.sessions.insert(client_id.clone(), session.clone());
        debug!(client_id = %client_id, "SSE session established");

        let hello = json!({
            "type": "connection",
            "clientId": client_id,
            "message": "Connected to MCP SSE stream",
        });
        let _ = session
            .out_tx
            .try_send(format_event("connection", &hello.to_string()));

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_worker(session, req_rx).await;
        });

        let stream =
            ReceiverStream::new(out_rx).map(|bytes| Ok::<_, hyper::Error>(Frame::data(bytes)));
        let body = BodyExt::boxed(StreamBody::new(stream));
        http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .unwrap_or_else(|_| http::Response::new(empty_body()))
    }

    /// Route a POSTed request body to a session.
    ///
    /// `202` on enqueue, `400` for unknown client ids, `503` when the
    /// session's request queue is full.
    pub fn route_request(&self, client_id: &str, body: Vec<u8>) -> HttpResponse {
        let Some(session) = self.session(client_id) else {
            return text_response(StatusCode::BAD_REQUEST, "unknown SSE client id");
        };
        match session.req_tx.try_send(body) {
            Ok(()) => text_response(StatusCode::ACCEPTED, "Accepted"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id, "SSE request queue full");
                text_response(StatusCode::SERVICE_UNAVAILABLE, "request queue full")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                text_response(StatusCode::BAD_REQUEST, "SSE session closed")
            }
        }
    }

    /// Stop every session worker and drop the session map
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn run_worker(self: Arc<Self>, session: Arc<SseSession>, mut req_rx: mpsc::Receiver<Vec<u8>>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                _ = session.out_tx.closed() => break,
                request = req_rx.recv() => {
                    match request {
                        Some(body) => {
                            if !self.handle_request(&session, &body).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    let data = json!({
                        "type": "ping",
                        "timestamp": SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs(),
                    });
                    if !self.enqueue(&session, format_event("ping", &data.to_string())) {
                        break;
                    }
                }
            }
        }
        self.finish(&session);
    }

    /// Dispatch one routed request. Returns `false` when the session's
    /// outbound channel is gone.
    async fn handle_request(&self, session: &Arc<SseSession>, body: &[u8]) -> bool {
        let is_initialized_notification = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("method").and_then(Value::as_str).map(str::to_string))
            .is_some_and(|method| {
                method == "initialized" || method == "notifications/initialized"
            });

        if let Some(response) = self.engine.process_bytes(body).await {
            let encoded = match serde_json::to_string(&response) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(error = %e, "failed to encode SSE response");
                    return true;
                }
            };
            if !self.enqueue(session, format_event("message", &encoded)) {
                return false;
            }
        }

        if is_initialized_notification {
            *session.state.lock() = SessionLifecycle::Initialized;
            let ready = json!({"jsonrpc": "2.0", "method": "ready", "params": {}});
            if !self.enqueue(session, format_event("notification", &ready.to_string())) {
                return false;
            }
            *session.state.lock() = SessionLifecycle::Ready;
            debug!(client_id = %session.client_id, "SSE session ready");
        }
        true
    }

    /// Non-blocking outbound send: full queues drop the message with a
    /// warning, a closed queue reports the session as gone.
    fn enqueue(&self, session: &Arc<SseSession>, event: Bytes) -> bool {
        match session.out_tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %session.client_id, "SSE outbound queue full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Remove the session exactly once
    fn finish(&self, session: &Arc<SseSession>) {
        if !session.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.sessions.remove(&session.client_id);
            debug!(client_id = %session.client_id, "SSE session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> Arc<JsonRpcEngine> {
        let engine = Arc::new(JsonRpcEngine::new());
        engine.register("ping", |_params| {
            Box::pin(async { Ok(json!({"message": "pong"})) })
        });
        engine.register("initialized", |_params| Box::pin(async { Ok(Value::Null) }));
        engine
    }

    async fn next_event(body: &mut hyperserve_server::HttpBody) -> String {
        let frame = body
            .frame()
            .await
            .expect("stream ended")
            .expect("stream errored");
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }

    fn client_id_of(event: &str) -> String {
        let data_line = event
            .lines()
            .find(|l| l.starts_with("data: "))
            .unwrap()
            .trim_start_matches("data: ");
        let value: Value = serde_json::from_str(data_line).unwrap();
        value["clientId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_establish_sends_connection_event() {
        let manager = SseManager::new(engine());
        let resp = manager.establish().await;
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(resp.headers()["X-Accel-Buffering"], "no");

        let mut body = resp.into_body();
        let event = next_event(&mut body).await;
        assert!(event.starts_with("event: connection\n"));
        assert!(client_id_of(&event).starts_with("sse-"));
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_request_response_over_session() {
        let manager = SseManager::new(engine());
        let resp = manager.establish().await;
        let mut body = resp.into_body();
        let client_id = client_id_of(&next_event(&mut body).await);

        let resp = manager.route_request(
            &client_id,
            br#"{"jsonrpc":"2.0","method":"ping","id":1}"#.to_vec(),
        );
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let event = next_event(&mut body).await;
        assert!(event.starts_with("event: message\n"));
        assert!(event.contains("\"pong\""));
        assert!(event.contains("\"id\":1"));
    }

    #[tokio::test]
    async fn test_responses_preserve_fifo_order() {
        let manager = SseManager::new(engine());
        let resp = manager.establish().await;
        let mut body = resp.into_body();
        let client_id = client_id_of(&next_event(&mut body).await);

        for id in 1..=3 {
            let payload = format!(r#"{{"jsonrpc":"2.0","method":"ping","id":{id}}}"#);
            manager.route_request(&client_id, payload.into_bytes());
        }
        for id in 1..=3 {
            let event = next_event(&mut body).await;
            assert!(event.contains(&format!("\"id\":{id}")), "event: {event}");
        }
    }

    #[tokio::test]
    async fn test_initialized_emits_ready_notification() {
        let manager = SseManager::new(engine());
        let resp = manager.establish().await;
        let mut body = resp.into_body();
        let client_id = client_id_of(&next_event(&mut body).await);

        let resp = manager.route_request(
            &client_id,
            br#"{"jsonrpc":"2.0","method":"initialized"}"#.to_vec(),
        );
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let event = next_event(&mut body).await;
        assert!(event.starts_with("event: notification\n"), "event: {event}");
        assert!(event.contains("\"ready\""));

        let session = manager.session(&client_id).unwrap();
        assert_eq!(session.lifecycle(), SessionLifecycle::Ready);
    }

    #[tokio::test]
    async fn test_unknown_client_id_gets_400() {
        let manager = SseManager::new(engine());
        let resp = manager.route_request("sse-unknown", b"{}".to_vec());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disconnect_closes_session_once() {
        let manager = SseManager::new(engine());
        let resp = manager.establish().await;
        assert_eq!(manager.session_count(), 1);

        // Dropping the body is the client disconnect.
        drop(resp);
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.session_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The once-flag makes a second finish a no-op rather than a panic.
        let session_gone = manager.session("sse-whatever").is_none();
        assert!(session_gone);
    }

    #[tokio::test]
    async fn test_shutdown_drains_sessions() {
        let manager = SseManager::new(engine());
        let _resp = manager.establish().await;
        let _resp2 = manager.establish().await;
        assert_eq!(manager.session_count(), 2);

        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.session_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_full_outbound_queue_drops_with_warning() {
        let manager = SseManager::with_config(engine(), 1, DEFAULT_PING_INTERVAL);
        let resp = manager.establish().await;
        let client_id = {
            // The connection event occupies the single queue slot.
            let session = manager
                .sessions
                .iter()
                .next()
                .map(|entry| entry.value().clone())
                .unwrap();
            session.client_id().to_string()
        };
        let session = manager.session(&client_id).unwrap();

        // Queue holds the connection event; the next enqueue drops.
        assert!(manager.enqueue(&session, Bytes::from_static(b"event: x\n\n")));
        drop(resp);
    }
}
