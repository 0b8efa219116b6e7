//! Patch resolution.
//!
//! The resolver takes every proposed edit of one response and produces
//! a per-file materialization plan: verified, conflict-free changes
//! plus a reason for every patch that was dropped. A plan is produced
//! even when all patches were rejected, so the caller can report
//! "nothing applied" without treating it as a hard failure.

use crate::stitch::{stitch, Splice};
use crate::verify::{verify_patch, Verdict, DEFAULT_MAX_RELOCATION_LINES};
use crate::{EditInstruction, FragmentPatch, RejectReason};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A patch dropped from a plan, with the reason.
#[derive(Debug, Clone)]
pub struct RejectedPatch {
    pub id: String,
    pub reason: RejectReason,
}

/// A patch that was applied at an adjusted span because its file
/// shifted since the fragment was captured.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub id: String,
    pub from: (usize, usize),
    pub to: (usize, usize),
}

/// The resolved, conflict-free set of changes to apply to one file.
#[derive(Debug, Clone)]
pub struct MaterializationPlan {
    /// Target file, relative to the repository root.
    pub path: PathBuf,

    /// Content the file should hold after the batch.
    pub final_content: String,

    /// Fragment ids applied, in instruction order.
    pub applied: Vec<String>,

    /// Patches dropped from this plan, with reasons.
    pub rejected: Vec<RejectedPatch>,

    /// Relocation warnings for applied patches.
    pub relocations: Vec<Relocation>,

    /// Whether `final_content` differs from the original content.
    pub changed: bool,
}

/// Turns proposed edits into per-file materialization plans.
#[derive(Debug, Clone)]
pub struct Resolver {
    max_relocation_lines: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RELOCATION_LINES)
    }
}

impl Resolver {
    pub fn new(max_relocation_lines: usize) -> Self {
        Self {
            max_relocation_lines,
        }
    }

    /// Resolve one response worth of instructions against current file
    /// contents.
    ///
    /// `contents` maps each touched path to its current content; a
    /// path absent from the map is treated as an empty (new) file.
    /// Returns one plan per touched path, in first-touched order.
    pub fn resolve(
        &self,
        instructions: &[EditInstruction],
        contents: &HashMap<PathBuf, String>,
    ) -> Vec<MaterializationPlan> {
        let mut path_order: Vec<PathBuf> = Vec::new();
        let mut by_path: HashMap<PathBuf, Vec<&EditInstruction>> = HashMap::new();

        for instruction in instructions {
            let path = instruction.path().to_path_buf();
            if !by_path.contains_key(&path) {
                path_order.push(path.clone());
            }
            by_path.entry(path).or_default().push(instruction);
        }

        path_order
            .into_iter()
            .map(|path| {
                let group = &by_path[&path];
                let original = contents.get(&path).map(String::as_str).unwrap_or("");
                self.plan_for_path(path, group, original)
            })
            .collect()
    }

    fn plan_for_path(
        &self,
        path: PathBuf,
        group: &[&EditInstruction],
        original: &str,
    ) -> MaterializationPlan {
        // A whole-file edit supersedes any fragment patch for the same
        // path in the same response; the last full edit wins.
        let full_content = group.iter().rev().find_map(|i| match i {
            EditInstruction::FullFile { content, .. } => Some(content.as_str()),
            EditInstruction::Fragment(_) => None,
        });

        if let Some(content) = full_content {
            let rejected = group
                .iter()
                .filter_map(|i| match i {
                    EditInstruction::Fragment(patch) => Some(RejectedPatch {
                        id: patch.fragment_id.clone(),
                        reason: RejectReason::Superseded,
                    }),
                    EditInstruction::FullFile { .. } => None,
                })
                .collect();

            return MaterializationPlan {
                changed: content != original,
                path,
                final_content: content.to_string(),
                applied: Vec::new(),
                rejected,
                relocations: Vec::new(),
            };
        }

        let patches: Vec<&FragmentPatch> = group
            .iter()
            .filter_map(|i| match i {
                EditInstruction::Fragment(patch) => Some(patch),
                EditInstruction::FullFile { .. } => None,
            })
            .collect();

        let mut rejected = Vec::new();
        let mut relocations = Vec::new();
        let mut verified: Vec<(usize, usize, &FragmentPatch)> = Vec::new();

        for &patch in &patches {
            match verify_patch(patch, original, self.max_relocation_lines) {
                Verdict::Valid => {
                    verified.push((patch.start_line, patch.end_line, patch));
                }
                Verdict::Relocated {
                    start_line,
                    end_line,
                } => {
                    warn!(
                        path = %path.display(),
                        fragment = %patch.fragment_id,
                        from = patch.start_line,
                        to = start_line,
                        "fragment patch relocated"
                    );
                    relocations.push(Relocation {
                        id: patch.fragment_id.clone(),
                        from: (patch.start_line, patch.end_line),
                        to: (start_line, end_line),
                    });
                    verified.push((start_line, end_line, patch));
                }
                Verdict::Rejected(reason) => {
                    debug!(
                        path = %path.display(),
                        fragment = %patch.fragment_id,
                        %reason,
                        "fragment patch rejected"
                    );
                    rejected.push(RejectedPatch {
                        id: patch.fragment_id.clone(),
                        reason,
                    });
                }
            }
        }

        // Overlap detection on final line ranges, in instruction order:
        // the later patch loses.
        let mut accepted: Vec<(usize, usize, &FragmentPatch)> = Vec::new();
        for (start, end, patch) in verified {
            if accepted
                .iter()
                .any(|&(a_start, a_end, _)| spans_overlap((a_start, a_end), (start, end)))
            {
                debug!(
                    path = %path.display(),
                    fragment = %patch.fragment_id,
                    "fragment patch overlaps an earlier patch"
                );
                rejected.push(RejectedPatch {
                    id: patch.fragment_id.clone(),
                    reason: RejectReason::Overlap,
                });
            } else {
                accepted.push((start, end, patch));
            }
        }

        let splices: Vec<Splice> = accepted
            .iter()
            .map(|&(start, end, patch)| Splice {
                start_line: start,
                end_line: end,
                new_content: patch.new_content.clone(),
            })
            .collect();

        let final_content = stitch(original, &splices);
        let applied = accepted
            .iter()
            .map(|&(_, _, patch)| patch.fragment_id.clone())
            .collect();

        MaterializationPlan {
            changed: final_content != original,
            path,
            final_content,
            applied,
            rejected,
            relocations,
        }
    }
}

/// Whether two final line ranges conflict. An insertion occupies the
/// empty range before its anchor and only conflicts when its anchor
/// falls strictly inside a replaced span.
fn spans_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    let a_insertion = a.1 < a.0;
    let b_insertion = b.1 < b.0;

    match (a_insertion, b_insertion) {
        (true, true) => false,
        (true, false) => b.0 < a.0 && a.0 <= b.1,
        (false, true) => a.0 < b.0 && b.0 <= a.1,
        (false, false) => a.0.max(b.0) <= a.1.min(b.1),
    }
}
