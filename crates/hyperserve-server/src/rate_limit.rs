//! Per-client token-bucket rate limiting.
//!
//! One bucket per client key (first `X-Forwarded-For` entry when present,
//! otherwise the connection's remote IP without port). A background task
//! evicts entries not seen for five minutes, on a one-minute cadence,
//! cancelled by the kernel's shutdown signal.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::handler::{ClientAddr, HttpRequest};
use crate::options::RateLimitConfig;

/// Idle threshold after which a client entry is evicted
pub const EVICTION_IDLE: Duration = Duration::from_secs(5 * 60);

/// Cadence of the background eviction task
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Token bucket with fractional refill
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(burst: u32) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: Instant::now(),
        }
    }

    fn allow(&mut self, rate: f64, burst: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(burst));
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Keyed token-bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: RwLock<HashMap<String, ClientEntry>>,
}

impl RateLimiter {
    /// Create a limiter with the given rate/burst
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the client identified by `key` may proceed
    pub fn allow(&self, key: &str) -> bool {
        let mut clients = self.clients.write();
        let entry = clients.entry(key.to_string()).or_insert_with(|| ClientEntry {
            bucket: TokenBucket::new(self.config.burst),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        let allowed = entry.bucket.allow(self.config.rate, self.config.burst);
        if !allowed {
            trace!(client = %key, "rate limit exceeded");
        }
        allowed
    }

    /// Number of tracked client entries
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no clients are tracked
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Drop entries idle for longer than `idle`
    pub fn evict_idle(&self, idle: Duration) {
        let now = Instant::now();
        let mut clients = self.clients.write();
        let before = clients.len();
        clients.retain(|_, entry| now.duration_since(entry.last_seen) < idle);
        let evicted = before - clients.len();
        if evicted > 0 {
            debug!(evicted, remaining = clients.len(), "rate limiter entries evicted");
        }
    }

    /// Run the eviction loop until `shutdown` flips to `true`
    pub async fn run_maintenance(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.evict_idle(EVICTION_IDLE),
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
        }
    }
}

/// Extract the limiter key for a request: first `X-Forwarded-For` entry if
/// present, otherwise the remote IP without port.
pub fn client_key(req: &HttpRequest) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    req.extensions()
        .get::<ClientAddr>()
        .map(|addr| addr.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::empty_body;

    fn limiter(rate: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig { rate, burst })
    }

    #[tokio::test]
    async fn test_burst_allows_then_denies() {
        let rl = limiter(10.0, 20);
        for _ in 0..20 {
            assert!(rl.allow("client"));
        }
        assert!(!rl.allow("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills() {
        let rl = limiter(10.0, 2);
        assert!(rl.allow("c"));
        assert!(rl.allow("c"));
        assert!(!rl.allow("c"));

        // 10 permits/sec: 200ms buys back two tokens.
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(rl.allow("c"));
        assert!(rl.allow("c"));
        assert!(!rl.allow("c"));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let rl = limiter(1.0, 1);
        assert!(rl.allow("a"));
        assert!(rl.allow("b"));
        assert!(!rl.allow("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction() {
        let rl = limiter(1.0, 1);
        rl.allow("stale");
        assert_eq!(rl.len(), 1);

        tokio::time::advance(EVICTION_IDLE).await;
        rl.allow("fresh");
        rl.evict_idle(EVICTION_IDLE);
        assert_eq!(rl.len(), 1);
        assert!(!rl.is_empty());
    }

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let req = http::Request::builder()
            .uri("/")
            .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
            .body(empty_body())
            .unwrap();
        assert_eq!(client_key(&req), "203.0.113.9");
    }

    #[test]
    fn test_client_key_falls_back_to_remote_addr() {
        let mut req = http::Request::builder().uri("/").body(empty_body()).unwrap();
        req.extensions_mut()
            .insert(ClientAddr("192.0.2.7:55555".parse().unwrap()));
        assert_eq!(client_key(&req), "192.0.2.7");
    }
}
