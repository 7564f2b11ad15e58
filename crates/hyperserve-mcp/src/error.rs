//! MCP control-plane error types.

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// MCP error taxonomy
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum McpError {
    /// Invalid tool or resource registration
    #[error("Registration error: {0}")]
    Registration(String),

    /// Namespace rules violated
    #[error("Namespace error: {0}")]
    Namespace(String),

    /// Transport failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tool execution failure; the string lands in JSON-RPC error `data`
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    /// Create a tool error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Resource read failure
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ResourceError(pub String);

impl ResourceError {
    /// Create a resource error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
