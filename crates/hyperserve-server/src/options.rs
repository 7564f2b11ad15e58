//! Server configuration.
//!
//! [`ServerOptions`] is immutable after start. Construction goes through
//! [`ServerBuilder`](crate::server::ServerBuilder); everything here is plain
//! data plus the narrow callback seams (TLS acceptor, auth validator,
//! deferred init, shutdown hooks) the kernel consumes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ServerResult;
use crate::server::Server;

/// Duplex byte stream produced by a TLS acceptor callback
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// TLS handshake callback: turns an accepted TCP stream into a duplex
/// stream. Certificate loading and FIPS selection happen behind this seam.
pub type TlsAcceptor = Arc<
    dyn Fn(TcpStream) -> BoxFuture<'static, std::io::Result<Box<dyn DuplexStream>>> + Send + Sync,
>;

/// Auth-token validator callback
pub type AuthValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Ordered shutdown hook
pub type ShutdownHook = Arc<dyn Fn() -> BoxFuture<'static, ServerResult<()>> + Send + Sync>;

/// Deferred initialization callback
pub type DeferredInitFn =
    Arc<dyn Fn(Server) -> BoxFuture<'static, ServerResult<()>> + Send + Sync>;

/// Callback run once the server becomes ready
pub type OnReadyFn = Arc<dyn Fn(Server) + Send + Sync>;

/// Per-tool discovery filter callback: `true` means advertise
pub type DiscoveryFilterFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Token-bucket rate limit parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Permits per second
    pub rate: f64,
    /// Bucket capacity
    pub burst: u32,
}

/// Connection deadline configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Per-read deadline
    pub read: Duration,
    /// Per-write deadline
    pub write: Duration,
    /// Keep-alive idle limit
    pub idle: Duration,
    /// Request-header read limit
    pub read_header: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(30),
            write: Duration::from_secs(30),
            idle: Duration::from_secs(120),
            read_header: Duration::from_secs(10),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin and disables credentials
    pub allowed_origins: Vec<String>,
    /// Allowed methods for preflight responses
    pub allowed_methods: Vec<String>,
    /// Allowed headers for preflight responses
    pub allowed_headers: Vec<String>,
    /// Whether credentialed requests are allowed
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age_secs: u64,
}

impl CorsConfig {
    /// Permissive configuration: any origin, common methods
    pub fn permissive() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: false,
            max_age_secs: 600,
        }
    }
}

/// Control-plane transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McpTransportKind {
    /// HTTP request/response plus SSE on the unified endpoint
    #[default]
    Http,
    /// Line-delimited JSON over stdin/stdout
    Stdio,
}

impl std::str::FromStr for McpTransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stdio" => Ok(Self::Stdio),
            other => Err(format!("unknown MCP transport: {other}")),
        }
    }
}

/// Discovery manifest policy, ordered by restrictiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryPolicy {
    /// No discovery routes registered
    None,
    /// Counts only, no name lists
    #[default]
    Count,
    /// Name lists for requests carrying an Authorization header
    Authenticated,
    /// Name lists for everyone
    Public,
}

impl std::str::FromStr for DiscoveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "count" => Ok(Self::Count),
            "authenticated" => Ok(Self::Authenticated),
            "public" => Ok(Self::Public),
            other => Err(format!("unknown discovery policy: {other}")),
        }
    }
}

/// MCP control-plane flags carried in the server options
#[derive(Clone)]
pub struct McpOptions {
    /// Whether the control plane is enabled
    pub enabled: bool,
    /// Endpoint path (default `/mcp`)
    pub endpoint: String,
    /// Advertised server name
    pub server_name: String,
    /// Advertised server version
    pub server_version: String,
    /// Transport selection
    pub transport: McpTransportKind,
    /// Developer mode: exposes debugging tools in discovery
    pub dev_mode: bool,
    /// Register the observability resource preset
    pub observability: bool,
    /// Discovery manifest policy
    pub discovery_policy: DiscoveryPolicy,
    /// Per-tool discovery filter
    pub discovery_filter: Option<DiscoveryFilterFn>,
    /// Log ring-buffer capacity (0 clamps to the default of 100)
    pub log_buffer_size: usize,
}

impl Default for McpOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "/mcp".to_string(),
            server_name: "hyperserve".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            transport: McpTransportKind::Http,
            dev_mode: false,
            observability: false,
            discovery_policy: DiscoveryPolicy::default(),
            discovery_filter: None,
            log_buffer_size: 100,
        }
    }
}

impl fmt::Debug for McpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpOptions")
            .field("enabled", &self.enabled)
            .field("endpoint", &self.endpoint)
            .field("server_name", &self.server_name)
            .field("server_version", &self.server_version)
            .field("transport", &self.transport)
            .field("dev_mode", &self.dev_mode)
            .field("observability", &self.observability)
            .field("discovery_policy", &self.discovery_policy)
            .field("has_discovery_filter", &self.discovery_filter.is_some())
            .field("log_buffer_size", &self.log_buffer_size)
            .finish()
    }
}

/// Deferred initialization configuration
#[derive(Clone)]
pub struct DeferredInit {
    /// The init callback, run concurrently with traffic acceptance
    pub callback: DeferredInitFn,
    /// Whether an init failure terminates the server
    pub stop_on_failure: bool,
}

impl fmt::Debug for DeferredInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredInit")
            .field("stop_on_failure", &self.stop_on_failure)
            .finish()
    }
}

/// Immutable-after-start server configuration
#[derive(Clone)]
pub struct ServerOptions {
    /// Main bind address
    pub addr: String,
    /// Optional dedicated health-probe address
    pub health_addr: Option<String>,
    /// TLS acceptor; `None` serves plaintext
    pub tls_acceptor: Option<TlsAcceptor>,
    /// Per-client rate limiting; `None` disables the limiter
    pub rate_limit: Option<RateLimitConfig>,
    /// Connection deadlines
    pub timeouts: Timeouts,
    /// Hardened mode: security-header stack registered globally at start
    pub hardened: bool,
    /// FIPS mode flag (surfaced in the config resource; enforcement is the
    /// TLS seam's concern)
    pub fips_mode: bool,
    /// Log level hint for embedding processes
    pub log_level: tracing::Level,
    /// MCP control-plane flags
    pub mcp: McpOptions,
    /// CORS configuration; `None` leaves CORS middleware unregistered
    pub cors: Option<CorsConfig>,
    /// Auth-token validator consumed by the auth middleware
    pub auth_validator: Option<AuthValidator>,
    /// Ordered shutdown hooks
    pub shutdown_hooks: Vec<ShutdownHook>,
    /// Deferred initialization protocol
    pub deferred_init: Option<DeferredInit>,
    /// Callback run when the server becomes ready
    pub on_ready: Option<OnReadyFn>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            health_addr: None,
            tls_acceptor: None,
            rate_limit: None,
            timeouts: Timeouts::default(),
            hardened: false,
            fips_mode: false,
            log_level: tracing::Level::INFO,
            mcp: McpOptions::default(),
            cors: None,
            auth_validator: None,
            shutdown_hooks: Vec::new(),
            deferred_init: None,
            on_ready: None,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("addr", &self.addr)
            .field("health_addr", &self.health_addr)
            .field("tls", &self.tls_acceptor.is_some())
            .field("rate_limit", &self.rate_limit)
            .field("timeouts", &self.timeouts)
            .field("hardened", &self.hardened)
            .field("fips_mode", &self.fips_mode)
            .field("log_level", &self.log_level)
            .field("mcp", &self.mcp)
            .field("cors", &self.cors.is_some())
            .field("auth_validator", &self.auth_validator.is_some())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .field("deferred_init", &self.deferred_init)
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}
