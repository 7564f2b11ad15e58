//! MCP protocol types.
//!
//! Wire shapes for the lifecycle and catalog methods. Only the fields the
//! protocol requires are modeled; tool input schemas stay JSON-Schema-shaped
//! `serde_json` values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision advertised when the client does not request one
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// `initialize` request parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol revision requested by the client
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    /// Client capability flags
    #[serde(default)]
    pub capabilities: Value,
    /// Client identity
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<PeerInfo>,
}

/// Client or server identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Display name
    pub name: String,
    /// Version string
    pub version: String,
}

/// `initialize` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol revision in effect
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capability flags
    pub capabilities: Value,
    /// Server identity
    #[serde(rename = "serverInfo")]
    pub server_info: PeerInfo,
    /// Optional usage instructions for the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Tool catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Fully qualified tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON-Schema-shaped input description
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Resource catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Opaque resource URI
    pub uri: String,
    /// Human-readable name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// MIME type of the payload
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// One item of tool-call result content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    /// Text content
    #[serde(rename = "text")]
    Text {
        /// The text payload
        text: String,
    },
}

impl ContentItem {
    /// A text content item
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// `tools/call` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Result content items
    pub content: Vec<ContentItem>,
    /// Whether the tool reported a failure
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// One item of `resources/read` contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceContents {
    /// Resource URI
    pub uri: String,
    /// MIME type
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Text payload (non-string values are JSON-encoded)
    pub text: String,
}

/// Shape a raw tool return value into MCP content items.
///
/// Values already carrying a `content` array pass through (including
/// `isError`); strings wrap as a single text item; anything else is
/// JSON-encoded first.
pub fn shape_tool_result(value: Value) -> Value {
    if let Value::Object(map) = &value
        && map.get("content").is_some_and(Value::is_array)
    {
        return value;
    }
    let text = match value {
        Value::String(s) => s,
        other => other.to_string(),
    };
    serde_json::json!({
        "content": [{"type": "text", "text": text}]
    })
}
