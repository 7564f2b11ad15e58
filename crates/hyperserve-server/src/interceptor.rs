//! Request/response interceptor chain.
//!
//! Interceptors are distinct from middleware: they operate on captured
//! request/response values, may mutate buffered bodies, and can
//! short-circuit the handler with an early response. The request phase runs
//! in registration order; the response phase runs in reverse. Metadata set
//! during the request phase is visible to the response phase.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::handler::{
    HttpHandler, HttpRequest, HttpResponse, collect_body, full_body, text_response,
};

/// Interceptor failure
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InterceptError(pub String);

impl InterceptError {
    /// Create an intercept error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// String-keyed metadata shared between the intercepted request and response
pub type Metadata = Arc<Mutex<HashMap<String, Value>>>;

/// Captured request flowing through the interceptor chain
#[derive(Debug)]
pub struct InterceptedRequest {
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: Uri,
    /// Request headers
    pub headers: HeaderMap,
    body: Mutex<BodyState>,
    extensions: Mutex<http::Extensions>,
    metadata: Metadata,
}

#[derive(Debug)]
enum BodyState {
    /// Original body, not yet read
    Streaming(Option<crate::handler::HttpBody>),
    /// Buffered and rereadable
    Buffered(Bytes),
}

impl InterceptedRequest {
    fn new(req: HttpRequest) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: Mutex::new(BodyState::Streaming(Some(body))),
            extensions: Mutex::new(parts.extensions),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Read the body, buffering it so later readers (and the handler) see
    /// the same bytes. The original stream is consumed exactly once.
    pub async fn body(&self) -> Result<Bytes, InterceptError> {
        let pending = {
            let mut state = self.body.lock();
            match &mut *state {
                BodyState::Buffered(bytes) => return Ok(bytes.clone()),
                BodyState::Streaming(body) => body.take(),
            }
        };
        let Some(body) = pending else {
            // A concurrent reader is draining the stream; the contract is
            // one buffering read per request.
            return Err(InterceptError::new("request body already being read"));
        };
        let bytes = collect_body(body)
            .await
            .map_err(|e| InterceptError::new(format!("failed to read request body: {e}")))?;
        *self.body.lock() = BodyState::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Replace the body; updates `Content-Length` to match
    pub fn set_body(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if let Ok(len) = http::HeaderValue::from_str(&bytes.len().to_string()) {
            self.headers.insert(http::header::CONTENT_LENGTH, len);
        }
        *self.body.lock() = BodyState::Buffered(bytes);
    }

    /// Set a metadata entry
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.lock().insert(key.into(), value);
    }

    /// Get a metadata entry
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.lock().get(key).cloned()
    }

    /// Rebuild an HTTP request for the wrapped handler. A buffered body is
    /// cloned so the response phase still sees it; an unread stream moves to
    /// the handler.
    fn take_for_handler(&self) -> HttpRequest {
        let state = std::mem::replace(&mut *self.body.lock(), BodyState::Buffered(Bytes::new()));
        let (body, keep) = match state {
            BodyState::Buffered(bytes) => (full_body(bytes.clone()), BodyState::Buffered(bytes)),
            BodyState::Streaming(Some(body)) => (body, BodyState::Buffered(Bytes::new())),
            BodyState::Streaming(None) => (
                full_body(Bytes::new()),
                BodyState::Buffered(Bytes::new()),
            ),
        };
        *self.body.lock() = keep;
        let mut req = http::Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone())
            .body(body)
            .unwrap_or_else(|_| http::Request::new(full_body(Bytes::new())));
        *req.headers_mut() = self.headers.clone();
        // Hand the original extensions through so upgrade handles and the
        // peer address survive interception.
        *req.extensions_mut() = std::mem::take(&mut *self.extensions.lock());
        req
    }
}

/// Captured response flowing through the interceptor chain
#[derive(Debug)]
pub struct InterceptedResponse {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Buffered response body
    pub body: Bytes,
    metadata: Metadata,
}

impl InterceptedResponse {
    /// Build an early response for short-circuiting the chain
    pub fn early(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get a metadata entry (shared with the request)
    pub fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.lock().get(key).cloned()
    }

    /// Set a metadata entry (shared with the request)
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.lock().insert(key.into(), value);
    }

    fn into_http_response(self) -> HttpResponse {
        let mut resp = http::Response::builder()
            .status(self.status)
            .body(full_body(self.body))
            .unwrap_or_else(|_| http::Response::new(full_body(Bytes::new())));
        *resp.headers_mut() = self.headers;
        resp
    }
}

/// A before/after hook pair applied around a handler
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Interceptor name, used in error logs
    fn name(&self) -> &str;

    /// Request-phase hook. Returning `Some(response)` short-circuits the
    /// handler and the remaining request-phase interceptors.
    async fn intercept_request(
        &self,
        req: &mut InterceptedRequest,
    ) -> Result<Option<InterceptedResponse>, InterceptError>;

    /// Response-phase hook, run in reverse registration order
    async fn intercept_response(
        &self,
        req: &InterceptedRequest,
        resp: &mut InterceptedResponse,
    ) -> Result<(), InterceptError>;
}

/// Ordered interceptor chain
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: parking_lot::RwLock<Vec<Arc<dyn Interceptor>>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .interceptors
            .read()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        f.debug_struct("InterceptorChain")
            .field("interceptors", &names)
            .finish()
    }
}

impl InterceptorChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    /// Number of registered interceptors
    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    /// Whether the chain is empty
    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    /// Wrap `handler` with the chain. With no interceptors registered the
    /// handler is returned untouched (no body buffering).
    pub fn wrap(self: &Arc<Self>, handler: HttpHandler) -> HttpHandler {
        let chain = self.clone();
        Arc::new(move |req: HttpRequest| {
            let chain = chain.clone();
            let handler = handler.clone();
            Box::pin(async move { chain.execute(req, handler).await })
        })
    }

    async fn execute(&self, req: HttpRequest, handler: HttpHandler) -> HttpResponse {
        let interceptors: Vec<Arc<dyn Interceptor>> = self.interceptors.read().clone();
        if interceptors.is_empty() {
            return handler(req).await;
        }

        let mut ireq = InterceptedRequest::new(req);
        let mut early: Option<InterceptedResponse> = None;
        let mut ran = 0usize;

        for interceptor in &interceptors {
            ran += 1;
            match interceptor.intercept_request(&mut ireq).await {
                Ok(None) => {}
                Ok(Some(resp)) => {
                    early = Some(resp);
                    break;
                }
                Err(e) => {
                    warn!(interceptor = interceptor.name(), error = %e, "request interception failed");
                    return text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error",
                    );
                }
            }
        }

        let mut iresp = match early {
            Some(mut resp) => {
                resp.metadata = ireq.metadata.clone();
                resp
            }
            None => {
                // Record the handler's response so interceptors can rewrite it.
                let metadata = ireq.metadata.clone();
                let http_req = ireq.take_for_handler();
                let resp = handler(http_req).await;
                let (parts, body) = resp.into_parts();
                let body = match collect_body(body).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "failed to record response body");
                        return text_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "internal server error",
                        );
                    }
                };
                InterceptedResponse {
                    status: parts.status,
                    headers: parts.headers,
                    body,
                    metadata,
                }
            }
        };

        // Response phase runs in reverse over the interceptors that saw the
        // request; failures are logged and the pass continues.
        for interceptor in interceptors[..ran].iter().rev() {
            if let Err(e) = interceptor.intercept_response(&ireq, &mut iresp).await {
                warn!(interceptor = interceptor.name(), error = %e, "response interception failed");
            }
        }

        iresp.into_http_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{empty_body, handler_fn};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        name: String,
        trace: Arc<StdMutex<Vec<String>>>,
        early: bool,
        fail_request: bool,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn intercept_request(
            &self,
            req: &mut InterceptedRequest,
        ) -> Result<Option<InterceptedResponse>, InterceptError> {
            self.trace.lock().unwrap().push(format!("req:{}", self.name));
            req.set_metadata(self.name.clone(), json!("seen"));
            if self.fail_request {
                return Err(InterceptError::new("request phase failed"));
            }
            if self.early {
                return Ok(Some(InterceptedResponse::early(
                    StatusCode::IM_A_TEAPOT,
                    "early",
                )));
            }
            Ok(None)
        }

        async fn intercept_response(
            &self,
            _req: &InterceptedRequest,
            resp: &mut InterceptedResponse,
        ) -> Result<(), InterceptError> {
            self.trace.lock().unwrap().push(format!("resp:{}", self.name));
            resp.headers.append(
                http::header::HeaderName::from_static("x-seen-by"),
                http::HeaderValue::from_str(&self.name).unwrap(),
            );
            Ok(())
        }
    }

    fn recorder(
        name: &str,
        trace: &Arc<StdMutex<Vec<String>>>,
        early: bool,
        fail: bool,
    ) -> Arc<dyn Interceptor> {
        Arc::new(Recorder {
            name: name.to_string(),
            trace: trace.clone(),
            early,
            fail_request: fail,
        })
    }

    fn ok_handler() -> HttpHandler {
        handler_fn(|_req| async { text_response(StatusCode::OK, "handled") })
    }

    fn request() -> HttpRequest {
        http::Request::builder().uri("/i").body(empty_body()).unwrap()
    }

    #[tokio::test]
    async fn test_request_order_and_reverse_response_order() {
        let trace = Arc::new(StdMutex::new(Vec::new()));
        let chain = Arc::new(InterceptorChain::new());
        chain.add(recorder("a", &trace, false, false));
        chain.add(recorder("b", &trace, false, false));

        let resp = chain.wrap(ok_handler())(request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["req:a", "req:b", "resp:b", "resp:a"]
        );
    }

    #[tokio::test]
    async fn test_early_response_skips_handler_and_rest() {
        let trace = Arc::new(StdMutex::new(Vec::new()));
        let chain = Arc::new(InterceptorChain::new());
        chain.add(recorder("a", &trace, true, false));
        chain.add(recorder("b", &trace, false, false));

        let resp = chain.wrap(ok_handler())(request()).await;
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        // b's request phase never ran; a's response phase still did.
        assert_eq!(*trace.lock().unwrap(), vec!["req:a", "resp:a"]);
    }

    #[tokio::test]
    async fn test_request_error_returns_500() {
        let trace = Arc::new(StdMutex::new(Vec::new()));
        let chain = Arc::new(InterceptorChain::new());
        chain.add(recorder("a", &trace, false, true));

        let resp = chain.wrap(ok_handler())(request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_metadata_flows_to_response_phase() {
        let chain = Arc::new(InterceptorChain::new());

        struct MetaCheck;
        #[async_trait]
        impl Interceptor for MetaCheck {
            fn name(&self) -> &str {
                "meta-check"
            }
            async fn intercept_request(
                &self,
                req: &mut InterceptedRequest,
            ) -> Result<Option<InterceptedResponse>, InterceptError> {
                req.set_metadata("k", json!(7));
                Ok(None)
            }
            async fn intercept_response(
                &self,
                _req: &InterceptedRequest,
                resp: &mut InterceptedResponse,
            ) -> Result<(), InterceptError> {
                assert_eq!(resp.metadata("k"), Some(json!(7)));
                Ok(())
            }
        }
        chain.add(Arc::new(MetaCheck));

        let resp = chain.wrap(ok_handler())(request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_buffering_is_rereadable() {
        let mut ireq = InterceptedRequest::new(
            http::Request::builder()
                .uri("/b")
                .body(full_body("payload"))
                .unwrap(),
        );
        assert_eq!(&ireq.body().await.unwrap()[..], b"payload");
        assert_eq!(&ireq.body().await.unwrap()[..], b"payload");

        ireq.set_body("replaced");
        assert_eq!(&ireq.body().await.unwrap()[..], b"replaced");
        assert_eq!(
            ireq.headers[http::header::CONTENT_LENGTH],
            "8"
        );
    }
}
