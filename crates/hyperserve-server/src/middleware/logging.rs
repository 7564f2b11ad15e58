//! Request logging middleware.
//!
//! Observes method, path, status and latency after the wrapped handler
//! completes. It never touches the body stream, so hijacked upgrades and
//! streaming responses pass through unchanged.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::handler::{HttpHandler, HttpRequest};
use crate::middleware::Middleware;

/// Logs one line per completed request at debug level
#[derive(Debug, Clone, Default)]
pub struct RequestLogger;

impl RequestLogger {
    /// Create the logger middleware
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RequestLogger {
    fn name(&self) -> &str {
        "request-logger"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        Arc::new(move |req: HttpRequest| {
            let next = next.clone();
            Box::pin(async move {
                let method = req.method().clone();
                let path = req.uri().path().to_string();
                let start = Instant::now();
                let resp = next(req).await;
                debug!(
                    method = %method,
                    path = %path,
                    status = resp.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "request completed"
                );
                resp
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{empty_body, handler_fn, text_response};
    use http::StatusCode;

    #[tokio::test]
    async fn test_passthrough() {
        let handler =
            RequestLogger::new().wrap(handler_fn(|_req| async {
                text_response(StatusCode::CREATED, "made")
            }));
        let req = http::Request::builder().uri("/r").body(empty_body()).unwrap();
        let resp = handler(req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
