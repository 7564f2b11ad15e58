//! Developer-mode tooling.
//!
//! `request_debugger` captures recent request/response pairs (bodies
//! truncated to 64 KiB per direction, 100 entries FIFO) through a capture
//! middleware, and exposes them as an MCP tool. `route_inspector` reports
//! the registered routes and their middleware names from the registry's
//! read-only view. Both tools are hidden from discovery outside developer
//! mode by the standard filter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};

use hyperserve_server::handler::{HttpHandler, HttpRequest, collect_body, full_body};
use hyperserve_server::middleware::Middleware;
use hyperserve_server::{HttpResponse, Server};

use crate::error::ToolError;
use crate::tool::Tool;

/// Capture cap per direction
pub const MAX_CAPTURED_BODY: usize = 64 * 1024;

/// Capture buffer capacity
pub const MAX_CAPTURED_REQUESTS: usize = 100;

/// Captured response half
#[derive(Debug, Clone, Serialize)]
pub struct CapturedResponse {
    /// Response status code
    pub status: u16,
    /// Response headers
    pub headers: Map<String, Value>,
    /// Response body, truncated to 64 KiB
    pub body: String,
}

/// One captured request/response pair
#[derive(Debug, Clone, Serialize)]
pub struct CapturedRequest {
    /// Capture sequence number
    pub id: u64,
    /// Request method
    pub method: String,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: Map<String, Value>,
    /// Request body, truncated to 64 KiB
    pub body: String,
    /// Capture time, RFC3339
    pub timestamp: String,
    /// The paired response
    pub response: CapturedResponse,
}

/// FIFO store of captured request/response pairs
#[derive(Debug, Default)]
pub struct RequestCapture {
    entries: Mutex<VecDeque<CapturedRequest>>,
    next_id: AtomicU64,
}

impl RequestCapture {
    /// Create an empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, captured: CapturedRequest) {
        let mut entries = self.entries.lock();
        if entries.len() == MAX_CAPTURED_REQUESTS {
            entries.pop_front();
        }
        entries.push_back(captured);
    }

    /// Copy out the captured entries, oldest first
    pub fn entries(&self) -> Vec<CapturedRequest> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Look up one capture by sequence number
    pub fn get(&self, id: u64) -> Option<CapturedRequest> {
        self.entries.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Number of captured entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    let slice = &bytes[..bytes.len().min(MAX_CAPTURED_BODY)];
    String::from_utf8_lossy(slice).into_owned()
}

fn headers_to_map(headers: &http::HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    map
}

/// Middleware buffering request/response bodies into a [`RequestCapture`].
///
/// Developer-mode only: both bodies are collected in memory. Truncation
/// applies to the capture, never to the traffic itself.
#[derive(Clone)]
pub struct CaptureMiddleware {
    capture: Arc<RequestCapture>,
}

impl std::fmt::Debug for CaptureMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureMiddleware")
            .field("captured", &self.capture.len())
            .finish()
    }
}

impl CaptureMiddleware {
    /// Build over a shared capture store
    pub fn new(capture: Arc<RequestCapture>) -> Self {
        Self { capture }
    }
}

impl Middleware for CaptureMiddleware {
    fn name(&self) -> &str {
        "request-capture"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        let capture = self.capture.clone();
        Arc::new(move |req: HttpRequest| {
            let capture = capture.clone();
            let next = next.clone();
            Box::pin(async move {
                let (parts, body) = req.into_parts();
                let request_bytes = collect_body(body).await.unwrap_or_default();
                let method = parts.method.to_string();
                let path = parts.uri.path().to_string();
                let request_headers = headers_to_map(&parts.headers);
                let request_body = truncate_body(&request_bytes);

                let mut req = http::Request::builder()
                    .method(parts.method)
                    .uri(parts.uri)
                    .body(full_body(request_bytes))
                    .unwrap_or_else(|_| http::Request::new(full_body("")));
                *req.headers_mut() = parts.headers;
                *req.extensions_mut() = parts.extensions;

                let resp = next(req).await;
                let (parts, body) = resp.into_parts();
                let response_bytes = collect_body(body).await.unwrap_or_default();

                let id = capture.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                capture.record(CapturedRequest {
                    id,
                    method,
                    path,
                    headers: request_headers,
                    body: request_body,
                    timestamp: Utc::now().to_rfc3339(),
                    response: CapturedResponse {
                        status: parts.status.as_u16(),
                        headers: headers_to_map(&parts.headers),
                        body: truncate_body(&response_bytes),
                    },
                });

                let mut resp = http::Response::builder()
                    .status(parts.status)
                    .body(full_body(response_bytes))
                    .unwrap_or_else(|_| http::Response::new(full_body("")));
                *resp.headers_mut() = parts.headers;
                resp
            }) as futures::future::BoxFuture<'static, HttpResponse>
        })
    }
}

/// MCP tool listing and inspecting captured requests
#[derive(Debug, Clone)]
pub struct RequestDebugger {
    capture: Arc<RequestCapture>,
}

impl RequestDebugger {
    /// Build over a shared capture store
    pub fn new(capture: Arc<RequestCapture>) -> Self {
        Self { capture }
    }
}

#[async_trait]
impl Tool for RequestDebugger {
    fn name(&self) -> &str {
        "request_debugger"
    }

    fn description(&self) -> &str {
        "Inspect recently captured HTTP requests and responses"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {
                    "type": "integer",
                    "description": "Capture id; omit to list summaries"
                }
            }
        })
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        match args.get("id").and_then(Value::as_u64) {
            Some(id) => {
                let captured = self
                    .capture
                    .get(id)
                    .ok_or_else(|| ToolError::new(format!("no captured request with id {id}")))?;
                serde_json::to_value(captured).map_err(|e| ToolError::new(e.to_string()))
            }
            None => {
                let summaries: Vec<Value> = self
                    .capture
                    .entries()
                    .into_iter()
                    .map(|entry| {
                        json!({
                            "id": entry.id,
                            "method": entry.method,
                            "path": entry.path,
                            "status": entry.response.status,
                            "timestamp": entry.timestamp,
                        })
                    })
                    .collect();
                Ok(json!({"requests": summaries}))
            }
        }
    }
}

/// MCP tool reporting registered routes and their middleware
///
/// The multiplexer does not track HTTP methods, so a fixed method list is
/// reported for every route.
#[derive(Debug, Clone)]
pub struct RouteInspector {
    server: Server,
}

impl RouteInspector {
    /// Build over the server whose routes are inspected
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Tool for RouteInspector {
    fn name(&self) -> &str {
        "route_inspector"
    }

    fn description(&self) -> &str {
        "List registered routes and the middleware applied to them"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        let middleware_routes = self.server.middleware_routes();
        let routes: Vec<Value> = self
            .server
            .route_patterns()
            .into_iter()
            .map(|pattern| {
                let middleware: Vec<String> = middleware_routes
                    .iter()
                    .filter(|(p, _)| p == "*" || pattern.starts_with(p.as_str()))
                    .flat_map(|(_, names)| names.iter().cloned())
                    .collect();
                json!({
                    "pattern": pattern,
                    "methods": ["GET", "POST", "PUT", "DELETE", "PATCH"],
                    "middleware": middleware,
                })
            })
            .collect();
        Ok(json!({"routes": routes}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use hyperserve_server::handler::{handler_fn, text_response};

    fn echo_handler() -> HttpHandler {
        handler_fn(|req: HttpRequest| async move {
            let body = collect_body(req.into_body()).await.unwrap_or_default();
            text_response(StatusCode::OK, body)
        })
    }

    #[tokio::test]
    async fn test_capture_records_pairs() {
        let capture = RequestCapture::new();
        let handler = CaptureMiddleware::new(capture.clone()).wrap(echo_handler());

        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri("/echo")
            .body(full_body("payload"))
            .unwrap();
        let resp = handler(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        // Traffic is untouched by the capture.
        let body = collect_body(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"payload");

        let entries = capture.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].method, "POST");
        assert_eq!(entries[0].path, "/echo");
        assert_eq!(entries[0].body, "payload");
        assert_eq!(entries[0].response.status, 200);
        assert_eq!(entries[0].response.body, "payload");
    }

    #[tokio::test]
    async fn test_capture_truncates_large_bodies() {
        let capture = RequestCapture::new();
        let handler = CaptureMiddleware::new(capture.clone()).wrap(echo_handler());

        let large = "x".repeat(MAX_CAPTURED_BODY + 1000);
        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri("/big")
            .body(full_body(large.clone()))
            .unwrap();
        let resp = handler(req).await;
        // The client still gets the full body.
        let body = collect_body(resp.into_body()).await.unwrap();
        assert_eq!(body.len(), large.len());
        // The capture is truncated silently.
        assert_eq!(capture.entries()[0].body.len(), MAX_CAPTURED_BODY);
        assert_eq!(capture.entries()[0].response.body.len(), MAX_CAPTURED_BODY);
    }

    #[tokio::test]
    async fn test_capture_fifo_cap() {
        let capture = RequestCapture::new();
        let handler = CaptureMiddleware::new(capture.clone()).wrap(echo_handler());
        for i in 0..(MAX_CAPTURED_REQUESTS + 5) {
            let req = http::Request::builder()
                .uri(format!("/r{i}"))
                .body(full_body(""))
                .unwrap();
            handler(req).await;
        }
        assert_eq!(capture.len(), MAX_CAPTURED_REQUESTS);
        assert_eq!(capture.entries()[0].path, "/r5");
    }

    #[tokio::test]
    async fn test_request_debugger_list_and_detail() {
        let capture = RequestCapture::new();
        let handler = CaptureMiddleware::new(capture.clone()).wrap(echo_handler());
        let req = http::Request::builder()
            .uri("/once")
            .body(full_body("hello"))
            .unwrap();
        handler(req).await;

        let debugger = RequestDebugger::new(capture);
        let list = debugger.call(json!({})).await.unwrap();
        assert_eq!(list["requests"].as_array().unwrap().len(), 1);
        let id = list["requests"][0]["id"].as_u64().unwrap();

        let detail = debugger.call(json!({"id": id})).await.unwrap();
        assert_eq!(detail["path"], "/once");
        assert_eq!(detail["body"], "hello");

        let missing = debugger.call(json!({"id": 9999})).await.unwrap_err();
        assert!(missing.to_string().contains("9999"));
    }

    #[tokio::test]
    async fn test_route_inspector_reports_fixed_methods() {
        let server = Server::new(hyperserve_server::ServerOptions::default());
        server.handle_fn("/api/things", |_req| async {
            text_response(StatusCode::OK, "ok")
        });

        let inspector = RouteInspector::new(server);
        let report = inspector.call(json!({})).await.unwrap();
        let route = &report["routes"][0];
        assert_eq!(route["pattern"], "/api/things");
        assert_eq!(
            route["methods"],
            json!(["GET", "POST", "PUT", "DELETE", "PATCH"])
        );
    }
}
