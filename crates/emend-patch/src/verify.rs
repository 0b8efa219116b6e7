//! Fragment verification.
//!
//! Before a fragment patch is allowed anywhere near a file, its claimed
//! prior text is checked against the current content. Files drift
//! between the time a fragment is captured and the time its patch
//! arrives; applying a patch whose span no longer holds the expected
//! text would silently corrupt the file.

use crate::{FragmentPatch, RejectReason};
use tracing::debug;

/// Files longer than this skip the relocation search and reject
/// mismatched patches as stale. The search is linear in file length
/// per patch, so it must be bounded for very large files.
pub const DEFAULT_MAX_RELOCATION_LINES: usize = 100_000;

/// Outcome of verifying a patch against current file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The snippet matches at the declared position.
    Valid,
    /// The snippet was found verbatim exactly once elsewhere; the
    /// patch applies at the adjusted span.
    Relocated { start_line: usize, end_line: usize },
    /// The patch must not be applied.
    Rejected(RejectReason),
}

/// Verify a fragment patch against the current content of its file.
///
/// Comparison is per-line with surrounding whitespace trimmed, so
/// indentation-only drift does not invalidate a patch. Relocation only
/// ever searches the patch's own file.
pub fn verify_patch(patch: &FragmentPatch, content: &str, max_relocation_lines: usize) -> Verdict {
    let lines: Vec<&str> = content.lines().collect();
    let snippet: Vec<&str> = patch
        .original_snippet
        .lines()
        .map(str::trim)
        .collect();

    if patch.is_insertion() {
        if snippet.is_empty() {
            // Nothing to verify; the insertion anchors at the declared line.
            return Verdict::Valid;
        }

        // The snippet describes the line(s) the insertion goes before.
        let anchor = patch.start_line.saturating_sub(1);
        if matches_at(&lines, anchor, &snippet) {
            return Verdict::Valid;
        }

        return match relocate(&lines, &snippet, max_relocation_lines) {
            Relocated::At(idx) => Verdict::Relocated {
                start_line: idx + 1,
                end_line: idx,
            },
            Relocated::NotFound => Verdict::Rejected(RejectReason::Stale),
            Relocated::Multiple => Verdict::Rejected(RejectReason::Ambiguous),
        };
    }

    if snippet.is_empty() {
        return Verdict::Rejected(RejectReason::MissingSnippet);
    }

    // Declared span [start_line, end_line] against the snippet. A span
    // whose length disagrees with the snippet, or that falls outside
    // the file, is an ordinary mismatch and takes the relocation path.
    let start = patch.start_line.saturating_sub(1);
    let span_len = patch.end_line.saturating_sub(patch.start_line) + 1;
    if patch.start_line >= 1 && span_len == snippet.len() && matches_at(&lines, start, &snippet) {
        return Verdict::Valid;
    }

    match relocate(&lines, &snippet, max_relocation_lines) {
        Relocated::At(idx) => Verdict::Relocated {
            start_line: idx + 1,
            end_line: idx + snippet.len(),
        },
        Relocated::NotFound => Verdict::Rejected(RejectReason::Stale),
        Relocated::Multiple => Verdict::Rejected(RejectReason::Ambiguous),
    }
}

enum Relocated {
    At(usize),
    NotFound,
    Multiple,
}

/// Search the file for the snippet's line sequence.
fn relocate(lines: &[&str], snippet: &[&str], max_relocation_lines: usize) -> Relocated {
    if lines.len() > max_relocation_lines {
        debug!(
            lines = lines.len(),
            cap = max_relocation_lines,
            "file exceeds relocation cap, rejecting mismatched patch as stale"
        );
        return Relocated::NotFound;
    }

    if snippet.len() > lines.len() {
        return Relocated::NotFound;
    }

    let mut found: Option<usize> = None;
    for idx in 0..=(lines.len() - snippet.len()) {
        if matches_at(lines, idx, snippet) {
            if found.is_some() {
                return Relocated::Multiple;
            }
            found = Some(idx);
        }
    }

    match found {
        Some(idx) => Relocated::At(idx),
        None => Relocated::NotFound,
    }
}

/// Whether the snippet matches the window starting at `idx`, comparing
/// trimmed lines.
fn matches_at(lines: &[&str], idx: usize, snippet: &[&str]) -> bool {
    if idx + snippet.len() > lines.len() {
        return false;
    }

    lines[idx..idx + snippet.len()]
        .iter()
        .zip(snippet.iter())
        .all(|(line, expected)| line.trim() == *expected)
}
