//! Patch error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for patch operations.
pub type PatchResult<T> = Result<T, PatchError>;

/// Errors that can occur while resolving edits.
///
/// Per-patch conflicts are not errors: they are reported as
/// [`RejectReason`]s on the materialization plan so the rest of the
/// batch can proceed.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Malformed instruction or instruction stream.
    #[error("validation error: {0}")]
    Validation(String),
}

impl PatchError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Why a fragment patch was dropped from a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The declared span no longer matches and the snippet was not
    /// found anywhere else in the file.
    Stale,
    /// The snippet matches more than one location in the file.
    Ambiguous,
    /// The patch overlaps an earlier patch in the same response.
    Overlap,
    /// The patch carries no `original_snippet` to verify against.
    MissingSnippet,
    /// A whole-file edit for the same path supersedes this patch.
    Superseded,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::Stale => "stale",
            RejectReason::Ambiguous => "ambiguous",
            RejectReason::Overlap => "overlap",
            RejectReason::MissingSnippet => "missing_snippet",
            RejectReason::Superseded => "superseded",
        };
        write!(f, "{s}")
    }
}
