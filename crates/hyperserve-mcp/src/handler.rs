//! MCP handler.
//!
//! Wraps the JSON-RPC engine with the MCP lifecycle and catalog methods,
//! owns the tool/resource registries, and serves the unified HTTP endpoint:
//! POST for request/response JSON-RPC, GET for capabilities JSON or the
//! documentation page, and GET with `Accept: text/event-stream` for SSE
//! sessions.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use http::{Method, StatusCode, header};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use hyperserve_jsonrpc::{JsonRpcEngine, JsonRpcError};
use hyperserve_server::handler::{
    HttpHandler, HttpRequest, HttpResponse, collect_body, full_body, json_response,
    text_response,
};
use hyperserve_server::options::McpOptions;

use crate::error::{McpError, McpResult};
use crate::resource::Resource;
use crate::sse::SseManager;
use crate::tool::{Tool, namespaced_name};
use crate::types::{
    DEFAULT_PROTOCOL_VERSION, InitializeParams, InitializeResult, PeerInfo, ResourceContents,
    ResourceDescriptor, ToolDescriptor, shape_tool_result,
};

/// MCP handler configuration
#[derive(Debug, Clone)]
pub struct McpConfig {
    /// Unified endpoint path
    pub endpoint: String,
    /// Advertised server name
    pub server_name: String,
    /// Advertised server version
    pub server_version: String,
    /// Optional usage instructions included in the initialize result
    pub instructions: Option<String>,
    /// Developer mode (debugging tools registered and discoverable)
    pub dev_mode: bool,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            endpoint: "/mcp".to_string(),
            server_name: "hyperserve".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            dev_mode: false,
        }
    }
}

impl From<&McpOptions> for McpConfig {
    fn from(options: &McpOptions) -> Self {
        Self {
            endpoint: options.endpoint.clone(),
            server_name: options.server_name.clone(),
            server_version: options.server_version.clone(),
            instructions: None,
            dev_mode: options.dev_mode,
        }
    }
}

pub(crate) struct McpState {
    config: McpConfig,
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    resources: RwLock<HashMap<String, Arc<dyn Resource>>>,
}

impl McpState {
    fn capabilities(&self) -> Value {
        json!({
            "tools": {"listChanged": false},
            "resources": {"subscribe": false, "listChanged": false},
        })
    }

    fn initialize_result(&self, requested_version: Option<&str>) -> InitializeResult {
        InitializeResult {
            protocol_version: requested_version
                .unwrap_or(DEFAULT_PROTOCOL_VERSION)
                .to_string(),
            capabilities: self.capabilities(),
            server_info: PeerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
            instructions: self.config.instructions.clone(),
        }
    }

    fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        // Copy under the lock into a stable slice before iterating.
        let tools: Vec<(String, Arc<dyn Tool>)> = self
            .tools
            .read()
            .iter()
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        let mut descriptors: Vec<ToolDescriptor> = tools
            .into_iter()
            .map(|(name, tool)| ToolDescriptor {
                name,
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    fn resource_descriptors(&self) -> Vec<ResourceDescriptor> {
        let resources: Vec<Arc<dyn Resource>> =
            self.resources.read().values().cloned().collect();
        let mut descriptors: Vec<ResourceDescriptor> = resources
            .into_iter()
            .map(|resource| ResourceDescriptor {
                uri: resource.uri().to_string(),
                name: resource.name().to_string(),
                description: resource.description().to_string(),
                mime_type: resource.mime_type().to_string(),
            })
            .collect();
        descriptors.sort_by(|a, b| a.uri.cmp(&b.uri));
        descriptors
    }
}

/// The MCP control-plane handler
#[derive(Clone)]
pub struct McpHandler {
    state: Arc<McpState>,
    engine: Arc<JsonRpcEngine>,
    sse: Arc<SseManager>,
}

impl std::fmt::Debug for McpHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpHandler")
            .field("endpoint", &self.state.config.endpoint)
            .field("tools", &self.tool_names().len())
            .field("resources", &self.resource_uris().len())
            .finish()
    }
}

impl McpHandler {
    /// Create a handler with the given configuration
    pub fn new(config: McpConfig) -> Self {
        let engine = Arc::new(JsonRpcEngine::new());
        let state = Arc::new(McpState {
            config,
            tools: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
        });
        register_methods(&engine, &state);
        let sse = SseManager::new(engine.clone());
        Self { state, engine, sse }
    }

    /// The unified endpoint path
    pub fn endpoint(&self) -> &str {
        &self.state.config.endpoint
    }

    /// Whether developer mode is on
    pub fn dev_mode(&self) -> bool {
        self.state.config.dev_mode
    }

    /// The underlying JSON-RPC engine (shared with the stdio transport)
    pub fn engine(&self) -> Arc<JsonRpcEngine> {
        self.engine.clone()
    }

    /// The SSE session manager
    pub fn sse(&self) -> Arc<SseManager> {
        self.sse.clone()
    }

    /// Register a tool under its raw name. Duplicate names overwrite the
    /// previous registration.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.state.tools.write().insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool re-registered, previous entry replaced");
        } else {
            debug!(tool = %name, "tool registered");
        }
    }

    /// Register a tool under `mcp__<namespace>__<raw>`. Empty namespaces
    /// are rejected.
    pub fn register_tool_in_namespace(
        &self,
        tool: Arc<dyn Tool>,
        namespace: &str,
    ) -> McpResult<()> {
        if namespace.is_empty() {
            return Err(McpError::Namespace("namespace must not be empty".into()));
        }
        let name = namespaced_name(namespace, tool.name());
        if self.state.tools.write().insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool re-registered, previous entry replaced");
        } else {
            debug!(tool = %name, namespace, "tool registered in namespace");
        }
        Ok(())
    }

    /// Register a resource by URI
    pub fn register_resource(&self, resource: Arc<dyn Resource>) {
        let uri = resource.uri().to_string();
        if self
            .state
            .resources
            .write()
            .insert(uri.clone(), resource)
            .is_some()
        {
            warn!(resource = %uri, "resource re-registered, previous entry replaced");
        } else {
            debug!(resource = %uri, "resource registered");
        }
    }

    /// Register a namespace: a named collection of tools and resources,
    /// inserted atomically
    pub fn register_namespace(
        &self,
        namespace: &str,
        tools: Vec<Arc<dyn Tool>>,
        resources: Vec<Arc<dyn Resource>>,
    ) -> McpResult<()> {
        if namespace.is_empty() {
            return Err(McpError::Namespace("namespace must not be empty".into()));
        }
        let mut tool_map = self.state.tools.write();
        let mut resource_map = self.state.resources.write();
        for tool in tools {
            let name = namespaced_name(namespace, tool.name());
            if tool_map.insert(name.clone(), tool).is_some() {
                warn!(tool = %name, "tool re-registered, previous entry replaced");
            }
        }
        for resource in resources {
            let uri = resource.uri().to_string();
            if resource_map.insert(uri.clone(), resource).is_some() {
                warn!(resource = %uri, "resource re-registered, previous entry replaced");
            }
        }
        Ok(())
    }

    /// Registered tool names (sorted)
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered tool handles (sorted by name)
    pub fn tools(&self) -> Vec<(String, Arc<dyn Tool>)> {
        let mut tools: Vec<(String, Arc<dyn Tool>)> = self
            .state
            .tools
            .read()
            .iter()
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        tools.sort_by(|a, b| a.0.cmp(&b.0));
        tools
    }

    /// Registered resource URIs (sorted)
    pub fn resource_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.state.resources.read().keys().cloned().collect();
        uris.sort();
        uris
    }

    /// The capabilities document served by GET and `initialize`
    pub fn capabilities_json(&self) -> Value {
        serde_json::to_value(self.state.initialize_result(None)).unwrap_or_default()
    }

    /// Boxed handler for registration on the route multiplexer
    pub fn http_handler(&self) -> HttpHandler {
        let handler = self.clone();
        Arc::new(move |req: HttpRequest| {
            let handler = handler.clone();
            Box::pin(async move { handler.serve_http(req).await })
        })
    }

    /// Serve one request against the unified endpoint
    pub async fn serve_http(&self, req: HttpRequest) -> HttpResponse {
        match *req.method() {
            Method::POST => self.serve_post(req).await,
            Method::GET => self.serve_get(req).await,
            _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        }
    }

    async fn serve_post(&self, req: HttpRequest) -> HttpResponse {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.to_ascii_lowercase().contains("application/json") {
            return text_response(
                StatusCode::BAD_REQUEST,
                "Content-Type must be application/json",
            );
        }

        let sse_client = req
            .headers()
            .get("x-sse-client-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match collect_body(req.into_body()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return text_response(
                    StatusCode::BAD_REQUEST,
                    format!("failed to read request body: {e}"),
                );
            }
        };

        // Session-routed requests are acknowledged immediately; the
        // response travels over the SSE stream.
        if let Some(client_id) = sse_client {
            return self.sse.route_request(&client_id, body.to_vec());
        }

        match self.engine.process_bytes(&body).await {
            Some(response) => {
                let value = serde_json::to_value(&response).unwrap_or_default();
                json_response(StatusCode::OK, &value)
            }
            None => text_response(StatusCode::ACCEPTED, ""),
        }
    }

    async fn serve_get(&self, req: HttpRequest) -> HttpResponse {
        let accept = req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if accept_contains(&accept, "text/event-stream") {
            return self.sse.establish().await;
        }
        if accepts_json(&accept) {
            return json_response(StatusCode::OK, &self.capabilities_json());
        }
        self.documentation_page()
    }

    fn documentation_page(&self) -> HttpResponse {
        let endpoint = &self.state.config.endpoint;
        let name = &self.state.config.server_name;
        let version = &self.state.config.server_version;
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><title>{name} MCP endpoint</title></head>
<body>
<h1>{name} v{version}</h1>
<p>This endpoint speaks the Model Context Protocol: JSON-RPC 2.0 over
HTTP POST, Server-Sent Events, and stdio.</p>
<h2>Usage</h2>
<ul>
<li><code>POST {endpoint}</code> with <code>Content-Type: application/json</code>
and a JSON-RPC 2.0 request body.</li>
<li><code>GET {endpoint}</code> with <code>Accept: application/json</code>
returns the capabilities document.</li>
<li><code>GET {endpoint}</code> with <code>Accept: text/event-stream</code>
opens an SSE session; route follow-up POSTs with the
<code>X-SSE-Client-ID</code> header.</li>
<li><code>GET /.well-known/mcp.json</code> returns the discovery manifest.</li>
</ul>
<h2>Methods</h2>
<p><code>initialize</code>, <code>initialized</code>, <code>ping</code>,
<code>tools/list</code>, <code>tools/call</code>, <code>resources/list</code>,
<code>resources/read</code></p>
</body>
</html>
"#
        );
        http::Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(full_body(html))
            .unwrap_or_else(|_| text_response(StatusCode::OK, "Model Context Protocol"))
    }
}

/// Whether an Accept header names a JSON media type (`application/json`,
/// `application/*`, `*/*`), ignoring q-parameters, case-insensitively
pub fn accepts_json(accept: &str) -> bool {
    accept
        .split(',')
        .map(|entry| entry.split(';').next().unwrap_or_default().trim())
        .any(|media| {
            media.eq_ignore_ascii_case("application/json")
                || media.eq_ignore_ascii_case("application/*")
                || media == "*/*"
        })
}

fn accept_contains(accept: &str, media_type: &str) -> bool {
    accept
        .split(',')
        .map(|entry| entry.split(';').next().unwrap_or_default().trim())
        .any(|media| media.eq_ignore_ascii_case(media_type))
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

fn register_methods(engine: &JsonRpcEngine, state: &Arc<McpState>) {
    let weak = Arc::downgrade(state);

    engine.register("initialize", with_state(&weak, |state, params| {
        let params: InitializeParams = match params {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?,
            None => InitializeParams::default(),
        };
        if let Some(client) = &params.client_info {
            debug!(client = %client.name, version = %client.version, "client initializing");
        }
        let result = state.initialize_result(params.protocol_version.as_deref());
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }));

    engine.register("initialized", with_state(&weak, |_state, _params| {
        debug!("client reported initialized");
        Ok(Value::Null)
    }));

    engine.register("ping", with_state(&weak, |_state, _params| {
        Ok(json!({"message": "pong"}))
    }));

    engine.register("tools/list", with_state(&weak, |state, _params| {
        let tools = state.tool_descriptors();
        Ok(json!({"tools": tools}))
    }));

    {
        let weak = weak.clone();
        engine.register("tools/call", move |params| {
            let weak = weak.clone();
            Box::pin(async move {
                let state = upgrade(&weak)?;
                let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
                    .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;
                let tool = state.tools.read().get(&params.name).cloned();
                let Some(tool) = tool else {
                    return Err(JsonRpcError::invalid_params(format!(
                        "tool not found: {}",
                        params.name
                    )));
                };
                match tool.call(params.arguments).await {
                    Ok(value) => Ok(shape_tool_result(value)),
                    Err(e) => Err(JsonRpcError::internal(e.to_string())),
                }
            })
        });
    }

    engine.register("resources/list", with_state(&weak, |state, _params| {
        let resources = state.resource_descriptors();
        Ok(json!({"resources": resources}))
    }));

    {
        let weak = weak.clone();
        engine.register("resources/read", move |params| {
            let weak = weak.clone();
            Box::pin(async move {
                let state = upgrade(&weak)?;
                let raw = params.unwrap_or(Value::Null);
                if !raw.is_object() {
                    return Err(JsonRpcError::invalid_params("failed to unmarshal"));
                }
                let params: ReadResourceParams = serde_json::from_value(raw)
                    .map_err(|_| JsonRpcError::invalid_params("failed to unmarshal"))?;
                let uri = match params.uri.as_deref() {
                    Some(uri) if !uri.is_empty() => uri.to_string(),
                    _ if params.arguments.is_some() => {
                        return Err(JsonRpcError::invalid_params(
                            "expects 'uri' parameter, not 'arguments'",
                        ));
                    }
                    _ => {
                        return Err(JsonRpcError::invalid_params("uri parameter is required"));
                    }
                };
                let resource = state.resources.read().get(&uri).cloned();
                let Some(resource) = resource else {
                    return Err(JsonRpcError::invalid_params("resource not found"));
                };
                let payload = resource
                    .read()
                    .await
                    .map_err(|e| JsonRpcError::internal(e.to_string()))?;
                let text = match payload {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let contents = ResourceContents {
                    uri: uri.clone(),
                    mime_type: resource.mime_type().to_string(),
                    text,
                };
                Ok(json!({"contents": [contents]}))
            })
        });
    }
}

fn upgrade(weak: &Weak<McpState>) -> Result<Arc<McpState>, JsonRpcError> {
    weak.upgrade()
        .ok_or_else(|| JsonRpcError::internal("server is shutting down"))
}

/// Wrap a synchronous method body with the weak-state upgrade dance
fn with_state<F>(
    weak: &Weak<McpState>,
    body: F,
) -> impl Fn(Option<Value>) -> futures::future::BoxFuture<'static, Result<Value, JsonRpcError>>
+ Send
+ Sync
+ 'static
where
    F: Fn(Arc<McpState>, Option<Value>) -> Result<Value, JsonRpcError>
        + Send
        + Sync
        + Clone
        + 'static,
{
    let weak = weak.clone();
    move |params| {
        let weak = weak.clone();
        let body = body.clone();
        Box::pin(async move {
            let state = upgrade(&weak)?;
            body(state, params)
        })
    }
}
