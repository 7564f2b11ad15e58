//! # HyperServe WebSocket
//!
//! RFC 6455 WebSocket engine: frame codec, upgrade negotiation with origin
//! policy, a connection type with control-frame plumbing and JSON helpers,
//! and a multi-endpoint connection pool with health checks and idle
//! eviction.
//!
//! ## Features
//!
//! - **Frame codec** - Header parsing with integer-overflow defense,
//!   mask enforcement for server-received frames, in-place unmasking
//! - **Handshake** - `Sec-WebSocket-Accept` computation, subprotocol
//!   negotiation, same-origin default policy with allow-list override
//! - **Connection** - Fragment coalescing bounded by a max message size,
//!   configurable ping/pong/close handlers, per-call read deadlines
//! - **Pool** - Per-endpoint reuse with CAS checkout, health pings against
//!   idle entries only, idle eviction, accounting counters
//!
//! ## Example
//!
//! ```no_run
//! use hyperserve_websocket::{Upgrader, upgrade::check_origin_with_allowed_list};
//!
//! # async fn example(req: http::Request<()>) -> Result<(), Box<dyn std::error::Error>> {
//! let upgrader = Upgrader::new()
//!     .with_allowed_origins(vec!["https://app.example.com".to_string()]);
//! let (response, conn_future) = upgrader.upgrade(req)?;
//! tokio::spawn(async move {
//!     if let Ok(conn) = conn_future.await {
//!         while let Ok((_opcode, payload)) = conn.read_message().await {
//!             let _ = conn.write_message(hyperserve_websocket::Opcode::Text, payload).await;
//!         }
//!     }
//! });
//! // return `response` from the HTTP handler
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod conn;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod upgrade;

pub use conn::{Conn, DEFAULT_MAX_MESSAGE_SIZE};
pub use error::{WsError, WsResult, is_close_error, is_unexpected_close_error};
pub use pool::{PoolConfig, PoolEntry, PoolStats, WsPool};
pub use protocol::{
    CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_INVALID_PAYLOAD,
    CLOSE_MANDATORY_EXTENSION, CLOSE_MESSAGE_TOO_BIG, CLOSE_NO_STATUS, CLOSE_NORMAL,
    CLOSE_POLICY_VIOLATION, CLOSE_PROTOCOL_ERROR, CLOSE_SERVICE_RESTART, CLOSE_TLS_HANDSHAKE,
    CLOSE_TRY_AGAIN_LATER, CLOSE_UNSUPPORTED_DATA, Frame, FrameCodec, Opcode,
};
pub use upgrade::{ServerConn, UpgradeError, Upgrader, accept_key};
