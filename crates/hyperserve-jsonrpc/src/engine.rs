//! JSON-RPC dispatch engine.
//!
//! Methods are registered by name into a registry (last write wins, logged at
//! debug) and dispatched against incoming payloads. Two entry points are
//! provided so transports can avoid double-encoding: [`JsonRpcEngine::process_bytes`]
//! for raw payloads and [`JsonRpcEngine::process_request`] for already-parsed
//! requests.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::message::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcRequest, JsonRpcResponse, RequestId,
};

/// Boxed async method handler.
///
/// Handlers receive the raw `params` value and either produce a result or a
/// full [`JsonRpcError`], which lets callers surface specific codes such as
/// `-32602 Invalid params`. Plain failure strings should go through
/// [`JsonRpcError::internal`].
pub type MethodHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, JsonRpcError>> + Send + Sync>;

/// Method registry and dispatcher for JSON-RPC 2.0
#[derive(Clone, Default)]
pub struct JsonRpcEngine {
    methods: Arc<RwLock<HashMap<String, MethodHandler>>>,
}

impl std::fmt::Debug for JsonRpcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcEngine")
            .field("methods", &self.method_names())
            .finish()
    }
}

impl JsonRpcEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method handler. Re-registering a name replaces the previous
    /// handler.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> BoxFuture<'static, Result<Value, JsonRpcError>>
            + Send
            + Sync
            + 'static,
    {
        let method = method.into();
        let mut methods = self.methods.write();
        if methods.insert(method.clone(), Arc::new(handler)).is_some() {
            debug!(method = %method, "JSON-RPC method re-registered, previous handler replaced");
        } else {
            debug!(method = %method, "JSON-RPC method registered");
        }
    }

    /// Whether a method is registered
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.read().contains_key(method)
    }

    /// Registered method names (sorted, for stable iteration)
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatch a raw payload.
    ///
    /// Returns `None` for notifications, which produce no response. Error
    /// mapping follows the protocol table: unparseable payloads yield
    /// `-32700` with a null id, version mismatches `-32600`, unknown methods
    /// `-32601`.
    pub async fn process_bytes(&self, payload: &[u8]) -> Option<JsonRpcResponse> {
        // Parse to a generic value first so the id can be echoed even when
        // the envelope is invalid.
        let value: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => return Some(JsonRpcResponse::parse_error(Some(e.to_string()))),
        };

        let id = extract_id(&value);

        if value.get("jsonrpc").and_then(Value::as_str) != Some(crate::message::JSONRPC_VERSION) {
            return Some(JsonRpcResponse::error(
                JsonRpcErrorCode::InvalidRequest.into(),
                id,
            ));
        }

        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    JsonRpcError::from(JsonRpcErrorCode::InvalidRequest)
                        .with_data(Value::String(e.to_string())),
                    id,
                ));
            }
        };

        self.process_request(request).await
    }

    /// Dispatch an already-parsed request, skipping re-encoding.
    ///
    /// Returns `None` for notifications.
    pub async fn process_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let handler = self.methods.read().get(&request.method).cloned();
        let id = request.id;

        let Some(handler) = handler else {
            // Notifications to unknown methods are silently dropped.
            return id.map(|id| {
                JsonRpcResponse::error(JsonRpcError::method_not_found(&request.method), Some(id))
            });
        };

        let outcome = handler(request.params).await;
        let id = id?;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::error(error, Some(id)),
        })
    }

    /// Dispatch a raw payload and encode the response, if any
    pub async fn process_bytes_to_vec(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let response = self.process_bytes(payload).await?;
        match serde_json::to_vec(&response) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                // Response encoding failing means a handler produced a
                // non-serializable value; degrade to an internal error.
                let fallback = JsonRpcResponse::error(
                    JsonRpcError::internal(e.to_string()),
                    response.id.0,
                );
                serde_json::to_vec(&fallback).ok()
            }
        }
    }
}

fn extract_id(value: &Value) -> Option<RequestId> {
    match value.get("id") {
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number),
        Some(Value::String(s)) => Some(RequestId::String(s.clone())),
        _ => None,
    }
}
