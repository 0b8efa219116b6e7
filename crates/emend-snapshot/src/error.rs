//! Snapshot error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Malformed input (bad path, unknown file in a commit, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// A per-file conflict surfaced at the batch level.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown batch or path, or an operation against a pruned batch.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another batch is already in flight for this repository.
    #[error("another batch is already in flight for this repository")]
    Busy,

    /// The in-flight batch was cancelled.
    #[error("batch cancelled")]
    Cancelled,

    /// Backend I/O or log failure.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The commit failed and some paths could not be rolled back to
    /// their pre-images. These need manual reconciliation.
    #[error("commit failed ({cause}); paths left inconsistent: {paths:?}")]
    Inconsistent { cause: String, paths: Vec<PathBuf> },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Git error from the reference-log backend.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl SnapshotError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Whether this error is the caller's fault rather than an engine
    /// or storage failure. The CLI maps user errors to exit code 1 and
    /// everything else to exit code 2.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Conflict(_)
                | Self::NotFound(_)
                | Self::Busy
                | Self::Cancelled
        )
    }
}
