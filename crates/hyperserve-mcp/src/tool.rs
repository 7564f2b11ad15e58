//! Tool model.
//!
//! A tool is a named callable with a JSON-Schema-shaped input description.
//! Arguments are not validated against the schema by the handler; tools
//! validate themselves and return clear errors.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ToolError;

/// Namespace prefix applied by namespaced registration
pub const NAMESPACE_PREFIX: &str = "mcp__";

/// A callable tool exposed through the control plane
#[async_trait]
pub trait Tool: Send + Sync {
    /// Raw tool name (namespacing is applied at registration)
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// JSON-Schema-shaped input description. Recognized top-level keys:
    /// `type`, `properties`, `required`, `enum`, `default`, `description`.
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn call(&self, args: Value) -> Result<Value, ToolError>;

    /// Whether discovery may advertise this tool
    fn is_discoverable(&self) -> bool {
        true
    }
}

/// The fully qualified name for a tool registered in `namespace`
pub fn namespaced_name(namespace: &str, raw: &str) -> String {
    format!("{NAMESPACE_PREFIX}{namespace}__{raw}")
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// A tool built from a closure
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    discoverable: bool,
    call: ToolFn,
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("discoverable", &self.discoverable)
            .finish()
    }
}

impl FnTool {
    /// Build a tool from an async closure
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        call: F,
    ) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            discoverable: true,
            call: Arc::new(call),
        }
    }

    /// Hide the tool from discovery regardless of policy
    pub fn hidden(mut self) -> Self {
        self.discoverable = false;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.call)(args).await
    }

    fn is_discoverable(&self) -> bool {
        self.discoverable
    }
}
