//! # HyperServe Server
//!
//! Hardened HTTP server kernel with lifecycle management, route-scoped
//! middleware, interceptors and per-client rate limiting.
//!
//! ## Features
//!
//! - **Lifecycle** - Listener binding, graceful ordered shutdown, deferred
//!   initialization with a bootstrap readiness gate
//! - **Middleware** - Route-prefix-scoped registration with deterministic
//!   composition order and named default stacks
//! - **Interceptors** - Request/response transformation with early-exit
//!   semantics and shared metadata, distinct from middleware
//! - **Rate limiting** - Per-client token buckets with background eviction
//! - **Security** - Header hardening, CORS, constant-time token auth,
//!   panic recovery
//!
//! ## Example
//!
//! ```no_run
//! use hyperserve_server::{Server, handler::{text_response}};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().addr("127.0.0.1:8080").build();
//!     server.add_default_middleware();
//!     server.handle_fn("/hello", |_req| async {
//!         text_response(StatusCode::OK, "hello")
//!     });
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod handler;
pub mod interceptor;
pub mod io;
pub mod metrics;
pub mod middleware;
pub mod mux;
pub mod options;
pub mod rate_limit;
pub mod server;

pub use error::{ServerError, ServerResult};
pub use handler::{ClientAddr, HttpBody, HttpHandler, HttpRequest, HttpResponse};
pub use interceptor::{
    InterceptError, InterceptedRequest, InterceptedResponse, Interceptor, InterceptorChain,
};
pub use metrics::ServerMetrics;
pub use middleware::{Middleware, MiddlewareRegistry};
pub use options::{
    AuthValidator, CorsConfig, DiscoveryPolicy, McpOptions, McpTransportKind, RateLimitConfig,
    ServerOptions, Timeouts,
};
pub use rate_limit::RateLimiter;
pub use server::{Server, ServerBuilder, ShutdownHandle};

/// Prelude for common kernel functionality
pub mod prelude {
    pub use crate::handler::{
        HttpHandler, HttpRequest, HttpResponse, full_body, handler_fn, json_response,
        text_response,
    };
    pub use crate::{
        CorsConfig, Interceptor, InterceptorChain, McpOptions, Middleware, Server, ServerBuilder,
        ServerError, ServerOptions, ServerResult, ShutdownHandle,
    };
}
