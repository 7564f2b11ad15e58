//! Route-scoped middleware registry and chain.
//!
//! Middleware wraps handlers. Registration maps a route pattern to an
//! ordered middleware list; `"*"` registers globally. For a request path
//! `p` the effective chain is the global list followed by the lists of
//! every non-global pattern that prefixes `p`, sorted by ascending pattern
//! length (ties by registration order). The first element wraps outermost,
//! so globals surround route-specific middleware and longer patterns sit
//! closest to the handler.
//!
//! Logging discipline: middleware installation is logged at registration
//! time only. Nothing in this module logs merely because a middleware was
//! invoked.

pub mod auth;
pub mod logging;
pub mod rate_limit;
pub mod recovery;
pub mod security;

pub use auth::{AuthToken, static_token_validator};
pub use logging::RequestLogger;
pub use rate_limit::RateLimit;
pub use recovery::Recovery;
pub use security::{Cors, SecurityHeaders};

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::handler::HttpHandler;
use crate::options::{AuthValidator, CorsConfig};

/// Pattern registering middleware for every route
pub const GLOBAL_PATTERN: &str = "*";

/// A handler-wrapping middleware
pub trait Middleware: Send + Sync {
    /// Middleware name, used in registration logs and the route inspector
    fn name(&self) -> &str;

    /// Wrap `next`, returning the composed handler
    fn wrap(&self, next: HttpHandler) -> HttpHandler;
}

struct Registration {
    pattern: String,
    middleware: Arc<dyn Middleware>,
}

/// Ordered, route-scoped middleware registry
#[derive(Default)]
pub struct MiddlewareRegistry {
    registrations: RwLock<Vec<Registration>>,
}

impl std::fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("routes", &self.routes())
            .finish()
    }
}

impl MiddlewareRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware for a pattern
    pub fn add(&self, pattern: impl Into<String>, middleware: Arc<dyn Middleware>) {
        let pattern = pattern.into();
        info!(pattern = %pattern, name = middleware.name(), "Middleware registered");
        self.registrations.write().push(Registration {
            pattern,
            middleware,
        });
    }

    /// Append an ordered middleware stack for a pattern
    pub fn add_stack(&self, pattern: impl Into<String>, stack: Vec<Arc<dyn Middleware>>) {
        let pattern = pattern.into();
        let names: Vec<&str> = stack.iter().map(|m| m.name()).collect();
        info!(pattern = %pattern, stack = ?names, "Middleware stack registered");
        let mut registrations = self.registrations.write();
        for middleware in stack {
            registrations.push(Registration {
                pattern: pattern.clone(),
                middleware,
            });
        }
    }

    /// Append a stack without the registration log line; callers log their
    /// own message (e.g. "Default middleware registered")
    pub(crate) fn extend_quiet(&self, pattern: impl Into<String>, stack: Vec<Arc<dyn Middleware>>) {
        let pattern = pattern.into();
        let mut registrations = self.registrations.write();
        for middleware in stack {
            registrations.push(Registration {
                pattern: pattern.clone(),
                middleware,
            });
        }
    }

    /// Number of registered middleware entries
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Read-only route → registered names view, for the route inspector
    pub fn routes(&self) -> Vec<(String, Vec<String>)> {
        let registrations = self.registrations.read();
        let mut out: Vec<(String, Vec<String>)> = Vec::new();
        for reg in registrations.iter() {
            match out.iter_mut().find(|(p, _)| *p == reg.pattern) {
                Some((_, names)) => names.push(reg.middleware.name().to_string()),
                None => out.push((
                    reg.pattern.clone(),
                    vec![reg.middleware.name().to_string()],
                )),
            }
        }
        out
    }

    /// Compose the effective handler for `path` around `terminal`
    pub fn compose(&self, path: &str, terminal: HttpHandler) -> HttpHandler {
        let registrations = self.registrations.read();

        let mut chain: Vec<Arc<dyn Middleware>> = registrations
            .iter()
            .filter(|r| r.pattern == GLOBAL_PATTERN)
            .map(|r| r.middleware.clone())
            .collect();

        // Matching non-global patterns, ascending by length; sort_by_key is
        // stable, so ties keep registration order.
        let mut scoped: Vec<&Registration> = registrations
            .iter()
            .filter(|r| r.pattern != GLOBAL_PATTERN && path.starts_with(r.pattern.as_str()))
            .collect();
        scoped.sort_by_key(|r| r.pattern.len());
        chain.extend(scoped.into_iter().map(|r| r.middleware.clone()));

        let mut handler = terminal;
        for middleware in chain.iter().rev() {
            handler = middleware.wrap(handler);
        }
        handler
    }
}

/// Recovery + request logging: the baseline stack
pub fn default_middleware() -> Vec<Arc<dyn Middleware>> {
    vec![Arc::new(Recovery::new()), Arc::new(RequestLogger::new())]
}

/// Hardened stack for browser-facing routes: recovery, logging, security
/// headers with a restrictive CSP
pub fn secure_web(tls: bool) -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(Recovery::new()),
        Arc::new(RequestLogger::new()),
        Arc::new(SecurityHeaders::web(tls)),
    ]
}

/// Hardened stack for API routes: recovery, logging, security headers, and
/// token auth when a validator is configured
pub fn secure_api(tls: bool, validator: Option<AuthValidator>) -> Vec<Arc<dyn Middleware>> {
    let mut stack: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(Recovery::new()),
        Arc::new(RequestLogger::new()),
        Arc::new(SecurityHeaders::api(tls)),
    ];
    if let Some(validator) = validator {
        stack.push(Arc::new(AuthToken::new(validator)));
    }
    stack
}

/// Stack for static-file routes: recovery, logging, sniffing protection
/// without a CSP
pub fn file_server() -> Vec<Arc<dyn Middleware>> {
    vec![
        Arc::new(Recovery::new()),
        Arc::new(RequestLogger::new()),
        Arc::new(SecurityHeaders::bare()),
    ]
}

/// CORS middleware from a [`CorsConfig`]
pub fn cors(config: CorsConfig) -> Arc<dyn Middleware> {
    Arc::new(Cors::new(config))
}
