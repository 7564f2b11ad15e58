//! Multi-endpoint WebSocket connection pool.
//!
//! Connections are keyed by a caller-supplied logical endpoint and reused
//! across requests. A maintenance task evicts idle connections and pings
//! the remainder on a health-check cadence. The pool never touches bytes on
//! an in-use connection: health pings CAS the in-use flag before sending.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex as TokioMutex, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::conn::Conn;
use crate::error::{WsError, WsResult};
use crate::protocol::CLOSE_GOING_AWAY;

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Per-endpoint connection cap
    pub max_connections_per_endpoint: usize,
    /// Idle connections older than this are evicted
    pub idle_timeout: Duration,
    /// Cadence of the maintenance task and minimum gap between health pings
    pub health_check_interval: Duration,
    /// Write deadline for health pings
    pub health_check_deadline: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_endpoint: 10,
            idle_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            health_check_deadline: Duration::from_secs(2),
        }
    }
}

/// Pool counters
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Connections established through the pool
    pub connections_created: AtomicU64,
    /// Idle connections handed back out
    pub connections_reused: AtomicU64,
    /// Currently checked-out connections
    pub active_connections: AtomicU64,
    /// Currently idle connections
    pub idle_connections: AtomicU64,
    /// Health pings that failed and evicted a connection
    pub health_checks_failed: AtomicU64,
}

impl PoolStats {
    /// Snapshot (created, reused, active, idle, failed-health-checks)
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64) {
        (
            self.connections_created.load(Ordering::Relaxed),
            self.connections_reused.load(Ordering::Relaxed),
            self.active_connections.load(Ordering::Relaxed),
            self.idle_connections.load(Ordering::Relaxed),
            self.health_checks_failed.load(Ordering::Relaxed),
        )
    }
}

/// One pooled connection
pub struct PoolEntry<S> {
    endpoint: String,
    conn: Conn<S>,
    in_use: AtomicBool,
    created_at: Instant,
    last_used: Mutex<Instant>,
    last_health_check: Mutex<Instant>,
}

impl<S> std::fmt::Debug for PoolEntry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("endpoint", &self.endpoint)
            .field("in_use", &self.in_use.load(Ordering::Relaxed))
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

impl<S> PoolEntry<S> {
    /// The pooled connection
    pub fn conn(&self) -> &Conn<S> {
        &self.conn
    }

    /// The logical endpoint this connection belongs to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct EndpointPool<S> {
    entries: Vec<Arc<PoolEntry<S>>>,
    /// Upgrades in flight, reserved against the per-endpoint cap
    pending: usize,
}

impl<S> Default for EndpointPool<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pending: 0,
        }
    }
}

/// Callback fired when the pool establishes a new connection
pub type OnConnectionCreated = Arc<dyn Fn(&str) + Send + Sync>;

/// Multi-endpoint connection pool
pub struct WsPool<S> {
    config: PoolConfig,
    endpoints: Mutex<HashMap<String, EndpointPool<S>>>,
    stats: PoolStats,
    on_connection_created: Option<OnConnectionCreated>,
    shutdown_tx: watch::Sender<bool>,
    maintenance: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<S> std::fmt::Debug for WsPool<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsPool")
            .field("config", &self.config)
            .field("total_connections", &self.total_connections())
            .finish()
    }
}

impl<S> WsPool<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    /// Create a pool with the given configuration
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
            stats: PoolStats::default(),
            on_connection_created: None,
            shutdown_tx,
            maintenance: TokioMutex::new(None),
        })
    }

    /// Create a pool with a connection-created callback
    pub fn with_callback(config: PoolConfig, callback: OnConnectionCreated) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
            stats: PoolStats::default(),
            on_connection_created: Some(callback),
            shutdown_tx,
            maintenance: TokioMutex::new(None),
        })
    }

    /// Pool counters
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Total pooled connections across endpoints
    pub fn total_connections(&self) -> usize {
        self.endpoints
            .lock()
            .values()
            .map(|pool| pool.entries.len())
            .sum()
    }

    /// Check out a connection for `endpoint`.
    ///
    /// An idle pooled connection is reused when available. Otherwise, if the
    /// endpoint is under its cap, `connect` establishes a new one (typically
    /// by performing an upgrade). At the cap the call fails with
    /// [`WsError::PoolLimitReached`].
    pub async fn get<F, Fut>(&self, endpoint: &str, connect: F) -> WsResult<Arc<PoolEntry<S>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WsResult<Conn<S>>>,
    {
        {
            let mut endpoints = self.endpoints.lock();
            let pool = endpoints.entry(endpoint.to_string()).or_default();

            for entry in &pool.entries {
                if entry
                    .in_use
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    *entry.last_used.lock() = Instant::now();
                    self.stats.connections_reused.fetch_add(1, Ordering::Relaxed);
                    self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
                    self.stats.idle_connections.fetch_sub(1, Ordering::Relaxed);
                    debug!(endpoint, "pooled connection reused");
                    return Ok(entry.clone());
                }
            }

            if pool.entries.len() + pool.pending >= self.config.max_connections_per_endpoint {
                return Err(WsError::PoolLimitReached {
                    endpoint: endpoint.to_string(),
                });
            }
            pool.pending += 1;
        }

        let connected = connect().await;

        let mut endpoints = self.endpoints.lock();
        let pool = endpoints.entry(endpoint.to_string()).or_default();
        pool.pending = pool.pending.saturating_sub(1);

        let conn = connected?;
        let now = Instant::now();
        let entry = Arc::new(PoolEntry {
            endpoint: endpoint.to_string(),
            conn,
            in_use: AtomicBool::new(true),
            created_at: now,
            last_used: Mutex::new(now),
            last_health_check: Mutex::new(now),
        });
        pool.entries.push(entry.clone());
        drop(endpoints);

        self.stats.connections_created.fetch_add(1, Ordering::Relaxed);
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        if let Some(callback) = &self.on_connection_created {
            callback(endpoint);
        }
        debug!(endpoint, "pooled connection created");
        Ok(entry)
    }

    /// Return a connection to the pool.
    ///
    /// A connection the pool does not know (already closed out) is closed
    /// instead of re-idled.
    pub async fn put(&self, entry: Arc<PoolEntry<S>>) {
        let known = {
            let endpoints = self.endpoints.lock();
            endpoints
                .get(&entry.endpoint)
                .is_some_and(|pool| pool.entries.iter().any(|e| Arc::ptr_eq(e, &entry)))
        };
        if !known {
            let _ = entry.conn.close(CLOSE_GOING_AWAY, "not pooled").await;
            return;
        }
        if entry
            .in_use
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *entry.last_used.lock() = Instant::now();
            self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            self.stats.idle_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a known-broken connection from the pool and close it. Safe to
    /// call twice for the same entry.
    pub async fn close(&self, entry: Arc<PoolEntry<S>>, reason: &str) {
        let removed = {
            let mut endpoints = self.endpoints.lock();
            match endpoints.get_mut(&entry.endpoint) {
                Some(pool) => {
                    let before = pool.entries.len();
                    pool.entries.retain(|e| !Arc::ptr_eq(e, &entry));
                    before != pool.entries.len()
                }
                None => false,
            }
        };
        if removed {
            if entry.in_use.load(Ordering::SeqCst) {
                self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            } else {
                self.stats.idle_connections.fetch_sub(1, Ordering::Relaxed);
            }
        }
        let _ = entry.conn.close(CLOSE_GOING_AWAY, reason).await;
    }

    /// Start the maintenance task (idle eviction and health pings)
    pub async fn start_maintenance(self: &Arc<Self>) {
        let pool = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.health_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => pool.run_maintenance_pass().await,
                    _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return,
                }
            }
        });
        *self.maintenance.lock().await = Some(handle);
    }

    /// One maintenance sweep over every endpoint
    pub async fn run_maintenance_pass(&self) {
        let entries: Vec<Arc<PoolEntry<S>>> = {
            let endpoints = self.endpoints.lock();
            endpoints
                .values()
                .flat_map(|pool| pool.entries.iter().cloned())
                .collect()
        };
        let now = Instant::now();

        for entry in entries {
            // Health checks only ever target idle entries; the CAS keeps a
            // concurrent get() from handing the connection out mid-ping.
            if entry
                .in_use
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }

            let idle_for = now.duration_since(*entry.last_used.lock());
            if idle_for > self.config.idle_timeout {
                debug!(endpoint = %entry.endpoint, idle = ?idle_for, "evicting idle pooled connection");
                self.remove_idle_guarded(&entry).await;
                let _ = entry.conn.close(CLOSE_GOING_AWAY, "idle timeout").await;
                continue;
            }

            let since_check = now.duration_since(*entry.last_health_check.lock());
            if since_check > self.config.health_check_interval {
                match entry
                    .conn
                    .ping("healthcheck", self.config.health_check_deadline)
                    .await
                {
                    Ok(()) => {
                        *entry.last_health_check.lock() = Instant::now();
                        entry.in_use.store(false, Ordering::SeqCst);
                    }
                    Err(e) => {
                        warn!(endpoint = %entry.endpoint, error = %e, "health check failed");
                        self.stats.health_checks_failed.fetch_add(1, Ordering::Relaxed);
                        self.remove_idle_guarded(&entry).await;
                        let _ = entry.conn.close(CLOSE_GOING_AWAY, "health check failed").await;
                    }
                }
            } else {
                entry.in_use.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Remove an entry whose in-use flag is held by the maintenance guard
    async fn remove_idle_guarded(&self, entry: &Arc<PoolEntry<S>>) {
        let mut endpoints = self.endpoints.lock();
        if let Some(pool) = endpoints.get_mut(&entry.endpoint) {
            let before = pool.entries.len();
            pool.entries.retain(|e| !Arc::ptr_eq(e, entry));
            if before != pool.entries.len() {
                self.stats.idle_connections.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Stop maintenance and close every pooled connection
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.maintenance.lock().await.take() {
            let _ = handle.await;
        }
        let entries: Vec<Arc<PoolEntry<S>>> = {
            let mut endpoints = self.endpoints.lock();
            endpoints
                .drain()
                .flat_map(|(_, pool)| pool.entries)
                .collect()
        };
        for entry in entries {
            let _ = entry.conn.close(CLOSE_GOING_AWAY, "pool shutdown").await;
        }
        self.stats.active_connections.store(0, Ordering::Relaxed);
        self.stats.idle_connections.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::DEFAULT_MAX_MESSAGE_SIZE;

    type DuplexConn = Conn<tokio::io::DuplexStream>;

    /// A connect callback producing one half of an in-memory pair; the
    /// other half is dropped, which is fine for checkout bookkeeping tests.
    async fn connect() -> WsResult<DuplexConn> {
        let (a, _b) = tokio::io::duplex(4096);
        Ok(Conn::server(a, DEFAULT_MAX_MESSAGE_SIZE))
    }

    fn config(max: usize) -> PoolConfig {
        PoolConfig {
            max_connections_per_endpoint: max,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_get_creates_then_reuses() {
        let pool = WsPool::new(config(4));

        let entry = pool.get("svc-a", connect).await.unwrap();
        let (created, reused, active, idle, _) = pool.stats().snapshot();
        assert_eq!((created, reused, active, idle), (1, 0, 1, 0));

        pool.put(entry).await;
        let (_, _, active, idle, _) = pool.stats().snapshot();
        assert_eq!((active, idle), (0, 1));

        let _entry = pool.get("svc-a", connect).await.unwrap();
        let (created, reused, active, idle, _) = pool.stats().snapshot();
        assert_eq!((created, reused, active, idle), (1, 1, 1, 0));
    }

    #[tokio::test]
    async fn test_limit_reached() {
        let pool = WsPool::new(config(2));
        let _a = pool.get("svc", connect).await.unwrap();
        let _b = pool.get("svc", connect).await.unwrap();
        let err = pool.get("svc", connect).await.unwrap_err();
        assert!(matches!(err, WsError::PoolLimitReached { .. }));
        assert!(err.to_string().contains("connection pool limit reached"));
    }

    #[tokio::test]
    async fn test_endpoints_are_independent() {
        let pool = WsPool::new(config(1));
        let _a = pool.get("svc-a", connect).await.unwrap();
        let _b = pool.get("svc-b", connect).await.unwrap();
        assert_eq!(pool.total_connections(), 2);
    }

    #[tokio::test]
    async fn test_close_removes_and_is_idempotent() {
        let pool = WsPool::new(config(2));
        let entry = pool.get("svc", connect).await.unwrap();
        pool.close(entry.clone(), "broken").await;
        assert_eq!(pool.total_connections(), 0);
        let (_, _, active, idle, _) = pool.stats().snapshot();
        assert_eq!((active, idle), (0, 0));

        // Second close of the same entry must not panic or skew counters.
        pool.close(entry, "broken again").await;
        let (_, _, active, idle, _) = pool.stats().snapshot();
        assert_eq!((active, idle), (0, 0));
    }

    #[tokio::test]
    async fn test_put_foreign_connection_closes_it() {
        let pool = WsPool::new(config(2));
        let entry = pool.get("svc", connect).await.unwrap();
        pool.close(entry.clone(), "gone").await;
        // Entry is no longer pooled; putting it back closes instead.
        pool.put(entry.clone()).await;
        assert!(!entry.conn().is_open());
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction() {
        let mut cfg = config(4);
        cfg.idle_timeout = Duration::from_secs(5);
        cfg.health_check_interval = Duration::from_secs(60);
        let pool = WsPool::new(cfg);

        let entry = pool.get("svc", connect).await.unwrap();
        pool.put(entry).await;
        assert_eq!(pool.total_connections(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        pool.run_maintenance_pass().await;
        assert_eq!(pool.total_connections(), 0);
        let (_, _, active, idle, _) = pool.stats().snapshot();
        assert_eq!((active, idle), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_skips_in_use_entries() {
        let mut cfg = config(4);
        cfg.idle_timeout = Duration::from_secs(5);
        let pool = WsPool::new(cfg);

        let _held = pool.get("svc", connect).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        pool.run_maintenance_pass().await;
        // Still checked out, so still pooled.
        assert_eq!(pool.total_connections(), 1);
    }

    #[tokio::test]
    async fn test_accounting_invariant() {
        let pool = WsPool::new(config(8));
        let a = pool.get("svc", connect).await.unwrap();
        let b = pool.get("svc", connect).await.unwrap();
        pool.put(a).await;

        let (_, _, active, idle, _) = pool.stats().snapshot();
        assert_eq!(pool.total_connections() as u64, active + idle);

        pool.put(b).await;
        let (_, _, active, idle, _) = pool.stats().snapshot();
        assert_eq!(pool.total_connections() as u64, active + idle);
    }

    #[tokio::test]
    async fn test_shutdown_drains_pool() {
        let pool = WsPool::new(config(4));
        pool.start_maintenance().await;
        let entry = pool.get("svc", connect).await.unwrap();
        pool.put(entry).await;

        pool.shutdown().await;
        assert_eq!(pool.total_connections(), 0);
    }

    #[tokio::test]
    async fn test_creation_callback_fires() {
        use std::sync::atomic::AtomicUsize;
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let pool = WsPool::with_callback(
            config(4),
            Arc::new(move |_endpoint| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let entry = pool.get("svc", connect).await.unwrap();
        pool.put(entry).await;
        let _reused = pool.get("svc", connect).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
