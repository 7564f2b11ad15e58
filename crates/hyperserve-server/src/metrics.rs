//! Kernel request metrics.
//!
//! Lock-free atomic counters, updated on the dispatch path and read by the
//! health resource.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic request counters
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Requests received
    pub requests_total: AtomicU64,
    /// Responses with status < 500
    pub responses_ok: AtomicU64,
    /// Responses with status >= 500
    pub responses_error: AtomicU64,
    /// Total time spent handling requests, in nanoseconds
    pub total_response_nanos: AtomicU64,
}

impl ServerMetrics {
    /// Record a completed request
    pub fn record(&self, status: http::StatusCode, elapsed_nanos: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if status.is_server_error() {
            self.responses_error.fetch_add(1, Ordering::Relaxed);
        } else {
            self.responses_ok.fetch_add(1, Ordering::Relaxed);
        }
        self.total_response_nanos
            .fetch_add(elapsed_nanos, Ordering::Relaxed);
    }

    /// Average response time in nanoseconds. Returns 0 when no requests have
    /// completed or the division would be meaningless.
    pub fn average_response_nanos(&self) -> u64 {
        let total = self.requests_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }
        self.total_response_nanos
            .load(Ordering::Relaxed)
            .checked_div(total)
            .unwrap_or(0)
    }
}
