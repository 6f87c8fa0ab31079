//! Error types for semantica-core.
//!
//! Uses a hierarchical error enum so callers can pattern-match on
//! the kind that failed. Mirrors the error taxonomy components
//! own internally, converted to `Error` at the boundary via `#[from]`.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Stage;

/// Top-level error type for all semantica-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A request arrived before the lifecycle state machine reached `Ready`.
    #[error("not ready")]
    NotReady,

    /// A startup stage exceeded its configured deadline.
    #[error("stage timed out: {stage:?}")]
    StageTimeout {
        /// The stage that timed out.
        stage: Stage,
    },

    /// A single file failed to parse.
    #[error("parse error for {path}: {cause}")]
    ParseError {
        /// Path to the file that failed to parse.
        path: PathBuf,
        /// Human-readable cause.
        cause: String,
    },

    /// No parser is registered for this file extension.
    #[error("unsupported extension: {ext}")]
    UnsupportedExtension {
        /// The unsupported extension.
        ext: String,
    },

    /// Encoding detection or decoding failed for a file.
    #[error("encoding error for {path}")]
    EncodingError {
        /// Path to the file whose encoding could not be resolved.
        path: PathBuf,
    },

    /// An embed request exceeded its deadline.
    #[error("embed request timed out")]
    EmbedTimeout,

    /// The embedder child process exited while a request was in flight.
    #[error("embedder process exited")]
    EmbedProcessExited,

    /// A batch failed after exhausting retries.
    #[error("embed batch failed: {reason}")]
    EmbedBatchFailed {
        /// Why the batch failed.
        reason: String,
    },

    /// The vector table could not complete an operation.
    #[error("vector store error: {0}")]
    VectorStoreError(String),

    /// The file status repository could not complete an operation.
    #[error("file status error: {0}")]
    FileStatusError(#[from] rusqlite::Error),

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is invalid or missing required fields.
    #[error("configuration error: {message}")]
    Config {
        /// What's wrong with the config.
        message: String,
    },
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::VectorStoreError(e.to_string())
    }
}

/// Convenience type alias for Results in semantica-core.
pub type Result<T> = std::result::Result<T, Error>;
