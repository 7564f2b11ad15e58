//! WebSocket error types.

/// Result type for WebSocket operations
pub type WsResult<T> = Result<T, WsError>;

/// WebSocket error taxonomy
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WsError {
    /// Protocol violation (malformed frame, bad handshake sequencing)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Declared or accumulated message size exceeds the configured limit
    #[error("Message too big: {size} bytes exceeds limit of {limit}")]
    MessageTooBig {
        /// Declared or accumulated size
        size: u64,
        /// Configured ceiling
        limit: usize,
    },

    /// Peer closed the connection
    #[error("Connection closed: {code} {reason}")]
    Closed {
        /// Close code from the peer (1005 when absent)
        code: u16,
        /// UTF-8 close reason
        reason: String,
    },

    /// The connection is no longer usable for sends
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Read or write deadline exceeded
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Connection pool per-endpoint limit reached
    #[error("connection pool limit reached for endpoint {endpoint}")]
    PoolLimitReached {
        /// Endpoint identifier
        endpoint: String,
    },

    /// JSON helper encode/decode failures
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Whether this error is a close with one of the given codes
    pub fn is_close_code(&self, codes: &[u16]) -> bool {
        matches!(self, Self::Closed { code, .. } if codes.contains(code))
    }
}

/// Whether `err` is a connection close carrying one of `codes`
pub fn is_close_error(err: &WsError, codes: &[u16]) -> bool {
    err.is_close_code(codes)
}

/// Whether `err` is a connection close with a code outside `expected`
pub fn is_unexpected_close_error(err: &WsError, expected: &[u16]) -> bool {
    matches!(err, WsError::Closed { code, .. } if !expected.contains(code))
}
