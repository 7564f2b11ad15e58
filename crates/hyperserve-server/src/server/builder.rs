//! Fluent server construction.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::ServerResult;
use crate::options::{
    AuthValidator, CorsConfig, DeferredInit, McpOptions, RateLimitConfig, ServerOptions,
    Timeouts, TlsAcceptor,
};
use crate::server::Server;

/// Builder for [`Server`]
///
/// ```no_run
/// use hyperserve_server::ServerBuilder;
///
/// let server = ServerBuilder::new()
///     .addr("0.0.0.0:8080")
///     .rate_limit(10.0, 20)
///     .hardened(true)
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct ServerBuilder {
    options: ServerOptions,
}

impl ServerBuilder {
    /// Start with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Main bind address
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.options.addr = addr.into();
        self
    }

    /// Dedicated health-probe address
    pub fn health_addr(mut self, addr: impl Into<String>) -> Self {
        self.options.health_addr = Some(addr.into());
        self
    }

    /// TLS acceptor callback; certificate loading stays behind this seam
    pub fn tls_acceptor(mut self, acceptor: TlsAcceptor) -> Self {
        self.options.tls_acceptor = Some(acceptor);
        self
    }

    /// Per-client rate limiting (permits per second, burst capacity)
    pub fn rate_limit(mut self, rate: f64, burst: u32) -> Self {
        self.options.rate_limit = Some(RateLimitConfig { rate, burst });
        self
    }

    /// Connection deadlines
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.options.timeouts = timeouts;
        self
    }

    /// Hardened mode: security-header stack registered globally at start
    pub fn hardened(mut self, hardened: bool) -> Self {
        self.options.hardened = hardened;
        self
    }

    /// FIPS mode flag (surfaced in the config resource)
    pub fn fips_mode(mut self, fips: bool) -> Self {
        self.options.fips_mode = fips;
        self
    }

    /// Log level hint
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.options.log_level = level;
        self
    }

    /// MCP control-plane flags
    pub fn mcp(mut self, mcp: McpOptions) -> Self {
        self.options.mcp = mcp;
        self
    }

    /// CORS configuration
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.options.cors = Some(cors);
        self
    }

    /// Auth-token validator
    pub fn auth_validator(mut self, validator: AuthValidator) -> Self {
        self.options.auth_validator = Some(validator);
        self
    }

    /// Append a shutdown hook; hooks run sequentially in registration order
    pub fn shutdown_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ServerResult<()>> + Send + Sync + 'static,
    {
        self.options.shutdown_hooks.push(Arc::new(hook));
        self
    }

    /// Configure deferred initialization
    pub fn deferred_init<F>(mut self, stop_on_failure: bool, callback: F) -> Self
    where
        F: Fn(Server) -> BoxFuture<'static, ServerResult<()>> + Send + Sync + 'static,
    {
        self.options.deferred_init = Some(DeferredInit {
            callback: Arc::new(callback),
            stop_on_failure,
        });
        self
    }

    /// Callback run when the server becomes ready
    pub fn on_ready<F>(mut self, callback: F) -> Self
    where
        F: Fn(Server) + Send + Sync + 'static,
    {
        self.options.on_ready = Some(Arc::new(callback));
        self
    }

    /// Build the server
    pub fn build(self) -> Server {
        Server::new(self.options)
    }
}
