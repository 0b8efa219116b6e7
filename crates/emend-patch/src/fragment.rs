//! Fragment retrieval collaborator interface.
//!
//! Fragments are produced and ranked by an external retrieval
//! subsystem. The engine only reads them to scope and verify patches;
//! it never persists fragments or their ranking.

use crate::FragmentPatch;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An externally produced, identified, line-bounded piece of file text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Retrieval-assigned fragment identifier.
    pub id: String,

    /// File the fragment was captured from, relative to the repository
    /// root.
    pub path: PathBuf,

    /// First line of the fragment (1-based).
    pub start_line: usize,

    /// Last line of the fragment (1-based, inclusive).
    pub end_line: usize,

    /// The fragment text as captured.
    pub content: String,

    /// Content hash assigned by the retrieval subsystem, if any.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl Fragment {
    /// Derive a patch replacing this fragment's span with `new_content`.
    ///
    /// The fragment's captured text becomes the patch's
    /// `original_snippet`, which the verifier checks against the
    /// current file before anything is written.
    pub fn to_patch(&self, new_content: impl Into<String>) -> FragmentPatch {
        FragmentPatch {
            path: self.path.clone(),
            fragment_id: self.id.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
            original_snippet: self.content.clone(),
            new_content: new_content.into(),
        }
    }
}

/// The retrieval subsystem, seen from the engine.
///
/// Implementations rank candidate fragments for a query text. The
/// engine consumes only `path`, `start_line`, `end_line` and `content`.
pub trait FragmentSource {
    /// Return ranked fragments for a query, best match first.
    fn query(&self, text: &str) -> Vec<Fragment>;
}
