//! Built-in observability resources.
//!
//! The observability preset registers three resources:
//! `config://server/current` (sanitized configuration),
//! `health://server/status` (liveness, readiness, request counters), and
//! `logs://server/recent` (a ring buffer of structured log entries). The
//! log buffer doubles as a `tracing_subscriber` layer: install it on the
//! registry and every record is captured before any chained formatter
//! runs.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer};

use hyperserve_server::Server;

use crate::handler::McpHandler;
use crate::resource::FnResource;

/// Default log ring-buffer capacity
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// One captured log record
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC3339 capture time
    pub time: String,
    /// Record level
    pub level: String,
    /// Record target (module path)
    pub target: String,
    /// Log message
    pub msg: String,
    /// Structured fields beyond the message
    pub attrs: Map<String, Value>,
}

struct LogBufferInner {
    capacity: usize,
    entries: RwLock<VecDeque<LogEntry>>,
}

/// Bounded ring buffer of structured log entries
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<LogBufferInner>,
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffer")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.inner.entries.read().len())
            .finish()
    }
}

impl LogBuffer {
    /// Create a buffer; a capacity of 0 clamps to the default of 100
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_LOG_CAPACITY
        } else {
            capacity
        };
        Self {
            inner: Arc::new(LogBufferInner {
                capacity,
                entries: RwLock::new(VecDeque::with_capacity(capacity)),
            }),
        }
    }

    /// Append an entry, dropping the oldest when full
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.inner.entries.write();
        if entries.len() == self.inner.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy out the buffered entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.entries.read().iter().cloned().collect()
    }

    /// Number of buffered entries
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// A `tracing_subscriber` layer capturing into this buffer
    pub fn layer(&self) -> LogBufferLayer {
        LogBufferLayer {
            buffer: self.clone(),
        }
    }
}

/// `tracing_subscriber` layer feeding a [`LogBuffer`]
#[derive(Debug, Clone)]
pub struct LogBufferLayer {
    buffer: LogBuffer,
}

impl<S: tracing::Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        self.buffer.push(LogEntry {
            time: Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            msg: visitor.message,
            attrs: visitor.attrs,
        });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    attrs: Map<String, Value>,
}

impl FieldCollector {
    fn set(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            self.attrs.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.set(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.set(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.set(field, json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.set(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.set(field, json!(value));
    }
}

/// Format a duration the way operators read uptime: `1h2m3s`
fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Sanitized configuration snapshot. Secrets and filesystem paths stay out:
/// the TLS and auth seams are reported as booleans only.
fn config_snapshot(server: &Server) -> Value {
    let options = server.options();
    json!({
        "version": options.mcp.server_version,
        "buildHash": option_env!("BUILD_HASH").unwrap_or("unknown"),
        "buildTime": option_env!("BUILD_TIME").unwrap_or("unknown"),
        "runtime": format!("rust {}", env!("CARGO_PKG_RUST_VERSION")),
        "bindAddr": options.addr,
        "healthAddr": options.health_addr,
        "tlsEnabled": options.tls_acceptor.is_some(),
        "rateLimit": options.rate_limit.map(|rl| json!({"rate": rl.rate, "burst": rl.burst})),
        "hardened": options.hardened,
        "fipsMode": options.fips_mode,
        "logLevel": options.log_level.to_string(),
        "mcp": {
            "enabled": options.mcp.enabled,
            "endpoint": options.mcp.endpoint,
            "serverName": options.mcp.server_name,
            "serverVersion": options.mcp.server_version,
            "devMode": options.mcp.dev_mode,
            "observability": options.mcp.observability,
        },
        "timeouts": {
            "readSecs": options.timeouts.read.as_secs(),
            "writeSecs": options.timeouts.write.as_secs(),
            "idleSecs": options.timeouts.idle.as_secs(),
            "readHeaderSecs": options.timeouts.read_header.as_secs(),
        },
        "middlewareCount": server.middleware_count(),
        "running": server.running(),
        "ready": server.ready(),
    })
}

fn health_snapshot(server: &Server) -> Value {
    let metrics = server.metrics();
    let uptime_secs = server.uptime().map_or(0, |d| d.as_secs());
    let total = metrics
        .requests_total
        .load(std::sync::atomic::Ordering::Relaxed);
    let errors = metrics
        .responses_error
        .load(std::sync::atomic::Ordering::Relaxed);
    let average_ms = metrics.average_response_nanos() as f64 / 1_000_000.0;
    json!({
        "alive": true,
        "ready": server.ready(),
        "uptime": format_uptime(uptime_secs),
        "uptimeSeconds": uptime_secs,
        "requestsTotal": total,
        "requestsFailed": errors,
        "averageResponseMs": average_ms,
        "rateLimiterEntries": server.rate_limiter_entries(),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Register the observability preset: config, health and log resources
pub fn register_observability(handler: &McpHandler, server: &Server, logs: LogBuffer) {
    let config_server = server.clone();
    handler.register_resource(Arc::new(FnResource::new(
        "config://server/current",
        "Server configuration",
        "Sanitized snapshot of the running server configuration",
        move || {
            let server = config_server.clone();
            Box::pin(async move { Ok(config_snapshot(&server)) })
        },
    )));

    let health_server = server.clone();
    handler.register_resource(Arc::new(FnResource::new(
        "health://server/status",
        "Server health",
        "Liveness, readiness, uptime and request counters",
        move || {
            let server = health_server.clone();
            Box::pin(async move { Ok(health_snapshot(&server)) })
        },
    )));

    handler.register_resource(Arc::new(FnResource::new(
        "logs://server/recent",
        "Recent logs",
        "Ring buffer of recent structured log entries",
        move || {
            let logs = logs.clone();
            Box::pin(async move {
                Ok(serde_json::to_value(logs.entries()).unwrap_or_default())
            })
        },
    )));
}
