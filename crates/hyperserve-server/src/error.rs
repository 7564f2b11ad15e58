//! Server error types and handling

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error taxonomy
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// Listener bind failures
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound
        addr: String,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server lifecycle errors
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Deferred initialization failures
    #[error("Deferred initialization failed: {0}")]
    DeferredInit(String),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
        /// Configuration key that caused the error
        key: Option<String>,
    },

    /// Middleware errors
    #[error("Middleware error: {name}: {message}")]
    Middleware {
        /// Middleware name
        name: String,
        /// Error message
        message: String,
    },

    /// Interceptor errors
    #[error("Interceptor error: {name}: {message}")]
    Interceptor {
        /// Interceptor name
        name: String,
        /// Error message
        message: String,
    },

    /// Shutdown hook errors
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol errors
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error scoped to a key
    pub fn configuration_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::DeferredInit("database unreachable".to_string());
        assert_eq!(
            err.to_string(),
            "Deferred initialization failed: database unreachable"
        );

        let err = ServerError::configuration_key("invalid port", "bind_addr");
        assert!(err.to_string().contains("invalid port"));
    }
}
