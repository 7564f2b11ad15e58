//! # HyperServe JSON-RPC
//!
//! JSON-RPC 2.0 message model and dispatch engine.
//!
//! This crate is the protocol substrate for the MCP control plane: typed
//! request/response/notification messages, the standard error-code table,
//! and a method registry with async boxed handlers.
//!
//! ## Dispatch semantics
//!
//! | Condition | Response |
//! |---|---|
//! | Payload fails to parse as JSON | `-32700 Parse error`, null id |
//! | `jsonrpc != "2.0"` | `-32600 Invalid Request`, echo id |
//! | Method not in registry | `-32601 Method not found`, echo id |
//! | Handler returns error | the handler's [`JsonRpcError`] verbatim |
//! | Success | `{result, id}` |
//!
//! Notifications (requests without an id) never produce a response.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod engine;
pub mod message;

pub use engine::{JsonRpcEngine, MethodHandler};
pub use message::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorCode, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, JsonRpcVersion, RequestId, ResponseId,
};
