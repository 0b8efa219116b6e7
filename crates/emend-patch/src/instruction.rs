//! Proposed-edit data structures.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One proposed edit from the change-generation source.
///
/// Paths are relative to the repository root. Instructions arrive as a
/// stream (a JSON array on the CLI) and are grouped per path by the
/// resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditInstruction {
    /// Replace the entire file content.
    FullFile {
        path: PathBuf,
        content: String,
    },
    /// Patch a line-bounded span of the file.
    Fragment(FragmentPatch),
}

impl EditInstruction {
    /// The target path of this instruction.
    pub fn path(&self) -> &Path {
        match self {
            EditInstruction::FullFile { path, .. } => path,
            EditInstruction::Fragment(patch) => &patch.path,
        }
    }
}

/// A line-scoped fragment patch.
///
/// Lines are 1-based and inclusive. `end_line < start_line` denotes a
/// pure insertion before `start_line`. An empty `new_content` deletes
/// the span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentPatch {
    /// Target file, relative to the repository root.
    pub path: PathBuf,

    /// Identifier of the fragment this patch was derived from.
    pub fragment_id: String,

    /// First line of the span (1-based).
    pub start_line: usize,

    /// Last line of the span (1-based, inclusive).
    pub end_line: usize,

    /// The text the span held when the fragment was captured.
    pub original_snippet: String,

    /// Replacement text for the span.
    pub new_content: String,
}

impl FragmentPatch {
    /// Whether this patch inserts before `start_line` without
    /// replacing anything.
    pub fn is_insertion(&self) -> bool {
        self.end_line < self.start_line
    }

    /// Whether this patch deletes its span.
    pub fn is_deletion(&self) -> bool {
        !self.is_insertion() && self.new_content.is_empty()
    }
}
