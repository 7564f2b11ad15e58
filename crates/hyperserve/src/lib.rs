//! # HyperServe
//!
//! A hardened, observable, AI-controllable HTTP runtime:
//!
//! - an HTTP/HTTPS serving kernel with route-scoped middleware,
//!   interceptors, per-client rate limiting and a deferred-init readiness
//!   gate ([`hyperserve_server`])
//! - an RFC 6455 WebSocket stack with a pooled client layer
//!   ([`hyperserve_websocket`])
//! - a native Model Context Protocol control plane over JSON-RPC 2.0,
//!   reachable via HTTP POST, SSE and stdio ([`hyperserve_mcp`])
//!
//! This crate re-exports the pieces; depend on it for the batteries-included
//! surface, or on the individual crates for a leaner build.
//!
//! ## Example
//!
//! ```no_run
//! use hyperserve::prelude::*;
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut mcp = McpOptions::default();
//!     mcp.enabled = true;
//!     let server = ServerBuilder::new().addr("127.0.0.1:8080").mcp(mcp).build();
//!     server.add_default_middleware();
//!     server.handle_fn("/hello", |_req| async {
//!         text_response(StatusCode::OK, "hello")
//!     });
//!     let _mcp = hyperserve::mcp::install(&server)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

pub use hyperserve_jsonrpc as jsonrpc;
pub use hyperserve_mcp as mcp;
pub use hyperserve_server as server;
pub use hyperserve_websocket as websocket;

pub use hyperserve_jsonrpc::{JsonRpcEngine, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use hyperserve_mcp::{FnResource, FnTool, McpHandler, StdioTransport};
pub use hyperserve_server::{
    Server, ServerBuilder, ServerError, ServerOptions, ServerResult, ShutdownHandle,
};
pub use hyperserve_websocket::{Upgrader, WsPool};

/// Prelude for application code
pub mod prelude {
    pub use hyperserve_jsonrpc::{JsonRpcEngine, JsonRpcError};
    pub use hyperserve_mcp::{FnResource, FnTool, McpHandler, Resource, Tool};
    pub use hyperserve_server::handler::{
        full_body, handler_fn, json_response, text_response,
    };
    pub use hyperserve_server::{
        CorsConfig, McpOptions, Server, ServerBuilder, ServerError, ServerOptions, ServerResult,
        ShutdownHandle,
    };
    pub use hyperserve_websocket::{Conn, Upgrader, WsPool};
}
