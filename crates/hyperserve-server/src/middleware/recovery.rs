//! Panic recovery middleware.
//!
//! Catches panics escaping the wrapped handler and converts them to
//! HTTP 500 so one misbehaving handler cannot tear down the connection
//! task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::handler::{HttpHandler, HttpRequest, text_response};
use crate::middleware::Middleware;

/// Converts handler panics into 500 responses
#[derive(Debug, Clone, Default)]
pub struct Recovery;

impl Recovery {
    /// Create the recovery middleware
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Recovery {
    fn name(&self) -> &str {
        "recovery"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        Arc::new(move |req: HttpRequest| {
            let next = next.clone();
            Box::pin(async move {
                let path = req.uri().path().to_string();
                match AssertUnwindSafe(next(req)).catch_unwind().await {
                    Ok(resp) => resp,
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!(path = %path, panic = %message, "handler panicked");
                        text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
                    }
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{empty_body, handler_fn};

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let handler = Recovery::new().wrap(handler_fn(|_req| async {
            panic!("boom");
        }));
        let req = http::Request::builder().uri("/p").body(empty_body()).unwrap();
        let resp = handler(req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_normal_response_untouched() {
        let handler = Recovery::new().wrap(handler_fn(|_req| async {
            text_response(StatusCode::OK, "fine")
        }));
        let req = http::Request::builder().uri("/p").body(empty_body()).unwrap();
        let resp = handler(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
