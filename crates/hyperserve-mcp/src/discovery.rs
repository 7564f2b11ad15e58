//! Discovery manifest and filter policies.
//!
//! Serves `/.well-known/mcp.json` and `<endpoint>/discover`. The manifest
//! advertises transports, endpoints and capability counts; whether tool and
//! resource name lists are included depends on the discovery policy, and
//! individual tools pass through a visibility filter before being listed.

use std::sync::Arc;

use http::{StatusCode, header};
use serde_json::{Value, json};

use hyperserve_server::Server;
use hyperserve_server::handler::{HttpRequest, json_response};
use hyperserve_server::options::{DiscoveryFilterFn, DiscoveryPolicy};

use crate::handler::McpHandler;
use crate::tool::Tool;

/// Well-known discovery path
pub const WELL_KNOWN_PATH: &str = "/.well-known/mcp.json";

/// Decide whether a tool may be advertised.
///
/// A user filter callback, when present, decides alone. Otherwise names
/// with `internal_` or `_` prefixes are hidden; outside developer mode,
/// names containing `debug` or `admin` and the built-in `server_control`
/// and `request_debugger` tools are hidden; finally the tool's own
/// `is_discoverable` hook applies.
pub fn tool_visible(
    name: &str,
    tool: &Arc<dyn Tool>,
    dev_mode: bool,
    filter: Option<&DiscoveryFilterFn>,
) -> bool {
    if let Some(filter) = filter {
        return filter(name);
    }
    if name.starts_with("internal_") || name.starts_with('_') {
        return false;
    }
    if !dev_mode {
        let lower = name.to_ascii_lowercase();
        if lower.contains("debug") || lower.contains("admin") {
            return false;
        }
        if name == "server_control" || name == "request_debugger" {
            return false;
        }
    }
    tool.is_discoverable()
}

/// Discovery route configuration
#[derive(Clone)]
pub struct DiscoveryConfig {
    /// Manifest policy
    pub policy: DiscoveryPolicy,
    /// Per-tool filter callback
    pub filter: Option<DiscoveryFilterFn>,
    /// Configured bind address, the base-URL fallback
    pub configured_addr: String,
    /// Whether the stdio transport is advertised
    pub stdio: bool,
}

impl std::fmt::Debug for DiscoveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryConfig")
            .field("policy", &self.policy)
            .field("has_filter", &self.filter.is_some())
            .field("configured_addr", &self.configured_addr)
            .field("stdio", &self.stdio)
            .finish()
    }
}

/// Register the discovery routes on the server
pub fn register(server: &Server, handler: &McpHandler, config: DiscoveryConfig) {
    let manifest_handler: hyperserve_server::HttpHandler = {
        let handler = handler.clone();
        let config = config.clone();
        Arc::new(move |req: HttpRequest| {
            let handler = handler.clone();
            let config = config.clone();
            Box::pin(async move {
                let manifest = build_manifest(&handler, &config, &req);
                json_response(StatusCode::OK, &manifest)
            })
        })
    };

    server.handle(WELL_KNOWN_PATH, manifest_handler.clone());
    server.handle(format!("{}/discover", handler.endpoint()), manifest_handler);
}

/// Compute the externally visible base URL: forwarded headers first, then
/// the Host header with an inferred scheme, then the configured address.
fn base_url(req: &HttpRequest, configured_addr: &str) -> String {
    let headers = req.headers();
    let forwarded_host = headers
        .get("x-forwarded-host")
        .and_then(|v| v.to_str().ok());
    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());

    if let Some(host) = forwarded_host {
        let scheme = forwarded_proto.unwrap_or("https");
        return format!("{scheme}://{host}");
    }
    if let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        let scheme = forwarded_proto.unwrap_or("http");
        return format!("{scheme}://{host}");
    }
    format!("http://{configured_addr}")
}

/// Build the discovery manifest for one request
pub fn build_manifest(
    handler: &McpHandler,
    config: &DiscoveryConfig,
    req: &HttpRequest,
) -> Value {
    let base = base_url(req, &config.configured_addr);
    let endpoint = handler.endpoint();
    let mcp_url = format!("{base}{endpoint}");

    let visible_tools: Vec<String> = handler
        .tools()
        .into_iter()
        .filter(|(name, tool)| {
            tool_visible(name, tool, handler.dev_mode(), config.filter.as_ref())
        })
        .map(|(name, _)| name)
        .collect();
    let resource_uris = handler.resource_uris();

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.is_empty());
    let include_counts = config.policy != DiscoveryPolicy::None;
    let include_lists = match config.policy {
        DiscoveryPolicy::Public => true,
        DiscoveryPolicy::Authenticated => authorized,
        DiscoveryPolicy::Count | DiscoveryPolicy::None => false,
    };

    let mut tools_caps = json!({"supported": true});
    let mut resources_caps = json!({"supported": true});
    if include_counts {
        tools_caps["count"] = json!(visible_tools.len());
        resources_caps["count"] = json!(resource_uris.len());
    }
    if include_lists {
        tools_caps["available"] = json!(visible_tools);
        resources_caps["available"] = json!(resource_uris);
    }

    let mut transports = vec![json!({
        "type": "http",
        "endpoint": mcp_url,
        "description": "JSON-RPC 2.0 over HTTP POST",
    })];
    transports.push(json!({
        "type": "sse",
        "endpoint": mcp_url,
        "description": "Server-Sent Events with X-SSE-Client-ID routed requests",
        "headers": {"Accept": "text/event-stream"},
    }));
    if config.stdio {
        transports.push(json!({
            "type": "stdio",
            "endpoint": "stdio",
            "description": "Line-delimited JSON-RPC over stdin/stdout",
        }));
    }

    let mut manifest = json!({
        "version": "1.0",
        "transports": transports,
        "endpoints": {
            "mcp": mcp_url,
            "initialize": mcp_url,
            "tools": format!("{mcp_url}#tools"),
            "resources": format!("{mcp_url}#resources"),
        },
        "capabilities": {
            "tools": tools_caps,
            "resources": resources_caps,
            "sse": {
                "enabled": true,
                "endpoint": "same",
                "headerRouting": true,
            },
        },
    });
    if config.stdio {
        manifest["capabilities"]["stdio"] = json!({"enabled": true});
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::McpConfig;
    use crate::tool::FnTool;
    use hyperserve_server::handler::empty_body;
    use serde_json::json;

    fn tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(name, "a tool", json!({"type": "object"}), |_| {
            Box::pin(async { Ok(Value::Null) })
        }))
    }

    fn handler_with_tools(dev_mode: bool) -> McpHandler {
        let handler = McpHandler::new(McpConfig {
            dev_mode,
            ..McpConfig::default()
        });
        handler.register_tool(tool("calculator"));
        handler.register_tool(tool("internal_migrate"));
        handler.register_tool(tool("_private"));
        handler.register_tool(tool("debug_probe"));
        handler.register_tool(tool("server_control"));
        handler.register_tool(Arc::new(
            FnTool::new("shy", "hidden by hook", json!({"type": "object"}), |_| {
                Box::pin(async { Ok(Value::Null) })
            })
            .hidden(),
        ));
        handler
    }

    fn config(policy: DiscoveryPolicy) -> DiscoveryConfig {
        DiscoveryConfig {
            policy,
            filter: None,
            configured_addr: "127.0.0.1:8080".to_string(),
            stdio: false,
        }
    }

    fn request(headers: &[(&str, &str)]) -> HttpRequest {
        let mut builder = http::Request::builder().uri("/.well-known/mcp.json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(empty_body()).unwrap()
    }

    #[test]
    fn test_default_filter_hides_internal_and_debug() {
        let handler = handler_with_tools(false);
        let manifest = build_manifest(
            &handler,
            &config(DiscoveryPolicy::Public),
            &request(&[("Host", "api.example.com")]),
        );
        let available = manifest["capabilities"]["tools"]["available"]
            .as_array()
            .unwrap();
        assert_eq!(available, &vec![json!("calculator")]);
    }

    #[test]
    fn test_dev_mode_reveals_debug_tools() {
        let handler = handler_with_tools(true);
        let manifest = build_manifest(
            &handler,
            &config(DiscoveryPolicy::Public),
            &request(&[("Host", "api.example.com")]),
        );
        let available: Vec<&str> = manifest["capabilities"]["tools"]["available"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        // Prefixed names stay hidden, debug/admin names appear, the
        // is_discoverable hook still applies.
        assert!(available.contains(&"calculator"));
        assert!(available.contains(&"debug_probe"));
        assert!(available.contains(&"server_control"));
        assert!(!available.contains(&"internal_migrate"));
        assert!(!available.contains(&"_private"));
        assert!(!available.contains(&"shy"));
    }

    #[test]
    fn test_user_filter_decides_alone() {
        let handler = handler_with_tools(false);
        let mut cfg = config(DiscoveryPolicy::Public);
        cfg.filter = Some(Arc::new(|name: &str| name == "internal_migrate"));
        let manifest = build_manifest(&handler, &cfg, &request(&[("Host", "h")]));
        let available = manifest["capabilities"]["tools"]["available"]
            .as_array()
            .unwrap();
        assert_eq!(available, &vec![json!("internal_migrate")]);
    }

    #[test]
    fn test_count_policy_omits_lists() {
        let handler = handler_with_tools(false);
        let manifest = build_manifest(
            &handler,
            &config(DiscoveryPolicy::Count),
            &request(&[("Host", "h")]),
        );
        assert!(manifest["capabilities"]["tools"]["count"].is_number());
        assert!(manifest["capabilities"]["tools"].get("available").is_none());
    }

    #[test]
    fn test_authenticated_policy_requires_header() {
        let handler = handler_with_tools(false);
        let cfg = config(DiscoveryPolicy::Authenticated);

        let manifest = build_manifest(&handler, &cfg, &request(&[("Host", "h")]));
        assert!(manifest["capabilities"]["tools"].get("available").is_none());

        let manifest = build_manifest(
            &handler,
            &cfg,
            &request(&[("Host", "h"), ("Authorization", "Bearer tok")]),
        );
        assert!(manifest["capabilities"]["tools"]["available"].is_array());
    }

    #[test]
    fn test_base_url_prefers_forwarded_headers() {
        let handler = handler_with_tools(false);
        let manifest = build_manifest(
            &handler,
            &config(DiscoveryPolicy::Count),
            &request(&[
                ("Host", "internal:8080"),
                ("X-Forwarded-Host", "api.example.com"),
                ("X-Forwarded-Proto", "https"),
            ]),
        );
        assert_eq!(
            manifest["endpoints"]["mcp"],
            "https://api.example.com/mcp"
        );
    }

    #[test]
    fn test_base_url_falls_back_to_configured_addr() {
        let handler = handler_with_tools(false);
        let manifest = build_manifest(&handler, &config(DiscoveryPolicy::Count), &request(&[]));
        assert_eq!(manifest["endpoints"]["mcp"], "http://127.0.0.1:8080/mcp");
    }

    #[test]
    fn test_sse_capability_advertised() {
        let handler = handler_with_tools(false);
        let manifest =
            build_manifest(&handler, &config(DiscoveryPolicy::Count), &request(&[]));
        assert_eq!(manifest["capabilities"]["sse"]["enabled"], true);
        assert_eq!(manifest["capabilities"]["sse"]["endpoint"], "same");
        assert_eq!(manifest["capabilities"]["sse"]["headerRouting"], true);
    }
}
