//! Core domain types shared across all semantica-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A passage of a document with page/offset provenance and its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from `path + offset` (see [`crate::hash::chunk_id`]).
    pub id: String,
    /// Absolute path to the source document.
    pub path: PathBuf,
    /// Source file modification time, milliseconds since epoch.
    pub mtime: i64,
    /// 1-based page number, or 0 when the format has no page concept.
    pub page: u32,
    /// Character offset of this chunk within the extracted document text.
    pub offset: usize,
    /// The chunk's extracted text.
    pub text: String,
    /// Dense embedding vector. Empty until the embedding stage completes.
    pub vector: Vec<f32>,
    /// File extension this chunk was extracted from (e.g. `"txt"`).
    pub r#type: String,
    /// Best-effort human title for the source document (file stem by default).
    pub title: String,
}

// ---------------------------------------------------------------------------
// FileStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Discovered, not yet processed.
    Queued,
    /// Indexed successfully with the current parser version.
    Indexed,
    /// Parse or embed failed after retries.
    Failed,
    /// A non-retryable error occurred (e.g. permanently unreadable file).
    Error,
    /// Indexed with an older parser version; scheduled for re-indexing.
    Outdated,
}

impl FileState {
    /// Database column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Outdated => "outdated",
        }
    }

    /// Parse the database column representation.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "indexed" => Self::Indexed,
            "failed" => Self::Failed,
            "error" => Self::Error,
            "outdated" => Self::Outdated,
            _ => Self::Queued,
        }
    }
}

/// Persistent per-file record tracked by the file status repository (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatus {
    /// Primary key.
    pub path: PathBuf,
    /// Current lifecycle state.
    pub status: FileState,
    /// Parser version this file was last indexed with.
    pub parser_version: u32,
    /// Number of chunks currently committed for this file.
    pub chunk_count: u32,
    /// Last error message, if any.
    pub error_message: Option<String>,
    /// On-disk modification time, milliseconds since epoch.
    pub last_modified: i64,
    /// Time this record was last committed as `indexed`, milliseconds since epoch.
    pub indexed_at: i64,
    /// 16-hex MD5 of `path:size:mtime_ms`.
    pub file_hash: String,
    /// Last retry attempt after a failure, milliseconds since epoch.
    pub last_retry: Option<i64>,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Per-folder indexing counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderStats {
    /// Total files discovered under this folder.
    pub total: u64,
    /// Files currently in `indexed` status under this folder.
    pub indexed: u64,
}

/// Snapshot of corpus-wide statistics, as returned by `db.stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    /// Number of files currently in `indexed` status.
    pub indexed_files: u64,
    /// Total committed chunks across all files.
    pub total_chunks: u64,
    /// Per-folder breakdown, keyed by watched-folder root.
    pub folder_stats: Vec<(String, FolderStats)>,
    /// Declared embedding dimension of the active model.
    pub model_dim: u32,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Lifecycle stage protocol (C13)
// ---------------------------------------------------------------------------

/// Ordered startup stages of the lifecycle state machine (C11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// No state machine activity has occurred yet.
    Uninitialized,
    /// Spawning the embedder child process.
    StartingSidecar,
    /// Embedder child has completed its ready handshake.
    SidecarReady,
    /// Creating/opening the vector table and file status repository.
    InitializingDb,
    /// Databases are open and migrated.
    DbReady,
    /// Repopulating the in-memory file-hash map from the file status repository.
    LoadingFiles,
    /// Enumerating and starting watches on the configured folders.
    ScanningFolders,
    /// Fully operational; all Query API requests are answered.
    Ready,
    /// Terminal failure state. Reachable from any non-terminal state.
    Error,
}

impl Stage {
    /// Position in the canonical ordering, used to reject backward transitions.
    ///
    /// `Error` has no ordinal: it is a sink reachable from any non-terminal
    /// state, not a position in the forward sequence.
    fn ordinal(self) -> Option<u8> {
        match self {
            Self::Uninitialized => Some(0),
            Self::StartingSidecar => Some(1),
            Self::SidecarReady => Some(2),
            Self::InitializingDb => Some(3),
            Self::DbReady => Some(4),
            Self::LoadingFiles => Some(5),
            Self::ScanningFolders => Some(6),
            Self::Ready => Some(7),
            Self::Error => None,
        }
    }

    /// True iff `from -> to` is an allowed transition per spec.md §4.11.
    pub fn is_valid_transition(from: Stage, to: Stage) -> bool {
        if from == to {
            return false;
        }
        match (from.ordinal(), to.ordinal()) {
            // Error is a sink; nothing leaves it.
            _ if from == Self::Error => false,
            // Error is reachable from any non-terminal, non-uninitialized state.
            (Some(_), None) => from != Self::Uninitialized,
            // Forward-only progression through the ordered sequence.
            (Some(a), Some(b)) => b == a + 1,
            (None, _) => false,
        }
    }
}

/// A single progress update published by the lifecycle state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageProgress {
    /// The stage this update concerns.
    pub stage: Stage,
    /// Optional human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional completion percentage, 0-100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Milliseconds since epoch when this update was produced.
    pub timestamp: i64,
}

impl StageProgress {
    /// Construct a progress update timestamped at the current time.
    pub fn new(stage: Stage, message: Option<String>, progress: Option<u8>) -> Self {
        Self {
            stage,
            message,
            progress,
            timestamp: now_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Indexing progress / events
// ---------------------------------------------------------------------------

/// Snapshot returned by `index.progress()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    /// Chunks queued but not yet dispatched to the embedder.
    pub queued: u64,
    /// Chunks currently embedding.
    pub processing: u64,
    /// Files fully committed this session.
    pub done: u64,
    /// Files that ended in `failed`/`error` this session.
    pub errors: u64,
    /// Whether the queue is currently paused.
    pub paused: bool,
    /// Whether the lifecycle state machine has reached `Ready` at least once.
    pub initialized: bool,
}

/// Internal pipeline control/data events, analogous to the teacher's
/// `PipelineEvent` but carrying document-search semantics.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A file was created or modified and should be evaluated for re-indexing.
    FileChanged {
        /// Absolute path to the file.
        path: PathBuf,
    },
    /// A file was deleted and should be removed from the index.
    FileDeleted {
        /// Absolute path to the deleted file.
        path: PathBuf,
    },
    /// A full folder scan is requested.
    FullScan,
    /// Shut the pipeline down gracefully.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// Response to `model.check()` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheck {
    /// Whether the embedder child reported ready (and so the model is usable).
    pub exists: bool,
    /// Declared embedding dimension of the active model.
    pub dim: u32,
}

/// A single grouped search hit, as returned by `search()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// Source document path.
    pub path: PathBuf,
    /// File name component of `path`, for display.
    pub file_name: String,
    /// Best (highest) score among this path's matching chunks.
    pub score: f32,
    /// Passage previews for this path, best-scoring first.
    pub preview: Vec<String>,
    /// Page of the best-scoring chunk, if applicable.
    pub page: Option<u32>,
    /// Character offset of the best-scoring chunk.
    pub offset: usize,
}
