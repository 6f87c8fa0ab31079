//! JSON-RPC protocol types for daemon IPC.
//!
//! All communication between a client (the CLI, or any other frontend)
//! and the daemon uses newline-delimited JSON-RPC 2.0 messages over a
//! named pipe (Windows) or Unix domain socket (Linux/macOS). Method
//! names and parameter shapes mirror the Query API 1:1 (spec.md §6).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 envelope
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version, always "2.0".
    pub jsonrpc: String,
    /// Request ID for correlating responses.
    pub id: u64,
    /// Method name, e.g. `"search"`, `"index.watchStart"`.
    pub method: String,
    /// Method parameters (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version, always "2.0".
    pub jsonrpc: String,
    /// Request ID this response corresponds to.
    pub id: u64,
    /// Successful result (mutually exclusive with `error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error result (mutually exclusive with `result`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
}

impl Response {
    /// Create a success response.
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    /// Create an error response.
    pub fn error(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0".into(), id, result: None, error: Some(RpcError { code, message: message.into() }) }
    }
}

/// An out-of-band server-to-client notification, used for `stage` and
/// `indexer:progress` events (spec.md §6). Shares the JSON-RPC object
/// shape but carries no `id`, distinguishing it from a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version, always "2.0".
    pub jsonrpc: String,
    /// Event name, e.g. `"stage"`.
    pub method: String,
    /// Event payload.
    pub params: serde_json::Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0".into(), method: method.into(), params }
    }
}

// ---------------------------------------------------------------------------
// Method-specific parameter types
// ---------------------------------------------------------------------------

/// Parameters for the `search` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// The search query.
    pub query: String,
    /// Maximum results.
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    100
}

/// Parameters for `index.watchStart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStartParams {
    /// Folders to watch and index, replacing the current set.
    pub folders: Vec<String>,
}

/// Parameters for `index.cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelParams {
    /// Path whose in-flight processing should be canceled.
    pub path: String,
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Standard JSON-RPC error codes, plus one engine-specific code.
pub mod error_codes {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i32 = -32700;
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Engine-specific error (not ready, parse/embed/store failure, etc.).
    pub const ENGINE_ERROR: i32 = -32000;
}
