//! Wire protocol for the embedder child process.
//!
//! Newline-delimited JSON over the child's stdin/stdout, mirroring the
//! daemon's own correlation-id-tagged request/response pattern (see
//! `semantica-daemon::protocol`) but scoped to the one method the child
//! needs to support: embedding a batch of texts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An embedding request sent to the child over stdin.
#[derive(Debug, Serialize)]
pub struct EmbedRequest<'a> {
    /// Correlation id; echoed back in the matching [`ChildMessage`].
    pub id: Uuid,
    /// Always `"embed"`.
    pub method: &'static str,
    /// Texts to embed, in the order the output vectors must preserve.
    pub texts: &'a [String],
    /// Whether this batch is a query embedding (vs. an indexing batch).
    pub is_query: bool,
}

/// A graceful-shutdown request sent to the child over stdin.
#[derive(Debug, Serialize)]
pub struct ShutdownRequest {
    /// Always `"shutdown"`.
    pub method: &'static str,
}

impl ShutdownRequest {
    /// Build the one-and-only shutdown request.
    pub fn new() -> Self {
        Self { method: "shutdown" }
    }
}

impl Default for ShutdownRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Any message the child writes to stdout.
///
/// Exactly one of (`ready`, `id`) is meaningful per line: the child
/// emits one unsolicited `{"ready":true}` line on startup, then one
/// reply per request it received, carrying that request's `id`.
#[derive(Debug, Default, Deserialize)]
pub struct ChildMessage {
    /// Set on the unsolicited startup handshake line.
    #[serde(default)]
    pub ready: bool,
    /// Correlation id this reply answers.
    pub id: Option<Uuid>,
    /// Embedding vectors, present on success.
    pub vectors: Option<Vec<Vec<f32>>>,
    /// Error description, present on failure.
    pub error: Option<String>,
    /// Best-effort external (non-RSS) heap usage in megabytes, reported
    /// opportunistically on any reply so the supervisor can fold it into
    /// its restart policy (spec.md §4.8).
    pub external_heap_mb: Option<u64>,
}
