//! Client-side JSON-RPC envelope, mirroring `semantica-daemon`'s wire
//! format (spec.md §6). Kept minimal and duplicated rather than shared
//! via a common crate, since the CLI only ever encodes requests and
//! decodes responses -- it never needs the daemon's dispatch table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self { jsonrpc: "2.0", id: 1, method: method.into(), params }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[allow(dead_code)]
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Derive the same deterministic pipe/socket name the daemon binds to.
pub fn default_pipe_name(data_dir: &std::path::Path) -> String {
    use sha2::{Digest, Sha256};
    let normalized = data_dir.to_string_lossy().replace(r"\\?\", "").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let hash = hex::encode(&hasher.finalize()[..6]);

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\semantica-{hash}")
    }

    #[cfg(not(windows))]
    {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
        format!("{runtime_dir}/semantica-{hash}.sock")
    }
}
