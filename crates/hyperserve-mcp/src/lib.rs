//! # HyperServe MCP
//!
//! Model Context Protocol control plane: a JSON-RPC 2.0 handler with tool
//! and resource registries, three transports (HTTP request/response,
//! session-routed SSE, line-delimited stdio), discovery endpoints with
//! filter policies, and built-in observability resources.
//!
//! ## Features
//!
//! - **Handler** - `initialize`/`initialized`/`ping`, `tools/*`,
//!   `resources/*` with strict parameter validation and tool response
//!   shaping
//! - **Namespaces** - `mcp__<ns>__<name>` registration, atomic namespace
//!   installs, last-write-wins collision policy
//! - **Transports** - unified HTTP endpoint (POST JSON-RPC, GET
//!   capabilities or documentation, SSE via `Accept: text/event-stream`)
//!   and a stdio loop for supervised processes
//! - **Discovery** - `/.well-known/mcp.json` and `<endpoint>/discover`
//!   with `none`/`count`/`authenticated`/`public` policies
//! - **Observability** - config/health/log resources; the log resource is
//!   a `tracing_subscriber` layer
//! - **Developer mode** - request capture middleware, `request_debugger`
//!   and `route_inspector` tools
//!
//! ## Wiring
//!
//! ```no_run
//! use hyperserve_server::ServerBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut mcp = hyperserve_server::McpOptions::default();
//! mcp.enabled = true;
//! mcp.observability = true;
//! let server = ServerBuilder::new().mcp(mcp).build();
//! let install = hyperserve_mcp::install(&server)?;
//! let _handler = install.handler;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod devtools;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod observability;
pub mod resource;
pub mod sse;
pub mod stdio;
pub mod tool;
pub mod types;

pub use error::{McpError, McpResult, ResourceError, ToolError};
pub use handler::{McpConfig, McpHandler, accepts_json};
pub use observability::{LogBuffer, LogEntry, register_observability};
pub use resource::{FnResource, Resource};
pub use sse::{SseManager, SseSession, SessionLifecycle};
pub use stdio::StdioTransport;
pub use tool::{FnTool, Tool, namespaced_name};
pub use types::{ContentItem, InitializeParams, InitializeResult, PeerInfo};

use std::sync::Arc;

use hyperserve_server::Server;
use hyperserve_server::middleware::GLOBAL_PATTERN;

use devtools::{CaptureMiddleware, RequestCapture, RequestDebugger, RouteInspector};
use discovery::DiscoveryConfig;
use hyperserve_server::options::McpTransportKind;

/// Everything `install` wires up
#[derive(Debug, Clone)]
pub struct McpInstall {
    /// The control-plane handler (register tools/resources here)
    pub handler: McpHandler,
    /// The log ring buffer; attach `logs.layer()` to the tracing registry
    /// to feed `logs://server/recent`
    pub logs: LogBuffer,
}

/// Wire the MCP control plane onto a server according to its
/// [`McpOptions`](hyperserve_server::McpOptions): the unified endpoint,
/// discovery routes, the observability preset and developer tools.
pub fn install(server: &Server) -> McpResult<McpInstall> {
    let options = server.options().mcp.clone();
    let handler = McpHandler::new(McpConfig::from(&options));
    let logs = LogBuffer::new(options.log_buffer_size);

    if !options.enabled {
        return Ok(McpInstall { handler, logs });
    }

    server.handle(options.endpoint.clone(), handler.http_handler());
    discovery::register(
        server,
        &handler,
        DiscoveryConfig {
            policy: options.discovery_policy,
            filter: options.discovery_filter.clone(),
            configured_addr: server.options().addr.clone(),
            stdio: options.transport == McpTransportKind::Stdio,
        },
    );

    if options.observability {
        register_observability(&handler, server, logs.clone());
    }

    if options.dev_mode {
        let capture = RequestCapture::new();
        server.add_middleware(
            GLOBAL_PATTERN,
            Arc::new(CaptureMiddleware::new(capture.clone())),
        );
        handler.register_tool(Arc::new(RequestDebugger::new(capture)));
        handler.register_tool(Arc::new(RouteInspector::new(server.clone())));
    }

    Ok(McpInstall { handler, logs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperserve_server::ServerOptions;

    fn options(enabled: bool, dev: bool, observability: bool) -> ServerOptions {
        let mut options = ServerOptions::default();
        options.mcp.enabled = enabled;
        options.mcp.dev_mode = dev;
        options.mcp.observability = observability;
        options
    }

    #[tokio::test]
    async fn test_install_disabled_registers_nothing() {
        let server = Server::new(options(false, false, false));
        let install = install(&server).unwrap();
        assert!(server.route_patterns().is_empty());
        assert!(install.handler.tool_names().is_empty());
    }

    #[tokio::test]
    async fn test_install_registers_endpoint_and_discovery() {
        let server = Server::new(options(true, false, false));
        let _install = install(&server).unwrap();
        let patterns = server.route_patterns();
        assert!(patterns.contains(&"/mcp".to_string()));
        assert!(patterns.contains(&"/.well-known/mcp.json".to_string()));
        assert!(patterns.contains(&"/mcp/discover".to_string()));
    }

    #[tokio::test]
    async fn test_install_observability_resources() {
        let server = Server::new(options(true, false, true));
        let install = install(&server).unwrap();
        assert_eq!(install.handler.resource_uris().len(), 3);
    }

    #[tokio::test]
    async fn test_install_dev_mode_tools() {
        let server = Server::new(options(true, true, false));
        let install = install(&server).unwrap();
        let names = install.handler.tool_names();
        assert!(names.contains(&"request_debugger".to_string()));
        assert!(names.contains(&"route_inspector".to_string()));
        // The capture middleware is registered globally.
        assert!(
            server
                .middleware_routes()
                .iter()
                .any(|(p, names)| p == "*" && names.contains(&"request-capture".to_string()))
        );
    }
}
