//! Rate-limiting middleware over the kernel's shared limiter.

use std::sync::Arc;

use http::StatusCode;

use crate::handler::{HttpHandler, HttpRequest, text_response};
use crate::middleware::Middleware;
use crate::rate_limit::{RateLimiter, client_key};

/// Rejects requests exceeding the per-client token bucket with 429
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    /// Build over a shared limiter
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Middleware for RateLimit {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        let limiter = self.limiter.clone();
        Arc::new(move |req: HttpRequest| {
            let limiter = limiter.clone();
            let next = next.clone();
            Box::pin(async move {
                if limiter.allow(&client_key(&req)) {
                    next(req).await
                } else {
                    text_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
                }
            })
        })
    }
}
