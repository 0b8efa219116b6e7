//! Edit resolution for emend.
//!
//! This crate turns a stream of proposed edits into per-file
//! materialization plans:
//! - Whole-file replacements are taken as-is
//! - Line-scoped fragment patches are verified against the current
//!   content, relocated when the file shifted, and rejected when stale,
//!   ambiguous or overlapping
//! - Surviving patches are spliced bottom-up into the line buffer
//!
//! Everything here is pure: the caller supplies current file content
//! and receives final content back. Nothing in this crate touches the
//! filesystem.
//!
//! # Example
//!
//! ```
//! use emend_patch::{EditInstruction, FragmentPatch, Resolver};
//! use std::collections::HashMap;
//! use std::path::PathBuf;
//!
//! let instructions = vec![EditInstruction::Fragment(FragmentPatch {
//!     path: PathBuf::from("notes.txt"),
//!     fragment_id: "frag-1".into(),
//!     start_line: 2,
//!     end_line: 2,
//!     original_snippet: "B".into(),
//!     new_content: "B2\n".into(),
//! })];
//!
//! let mut contents = HashMap::new();
//! contents.insert(PathBuf::from("notes.txt"), "A\nB\nC\n".to_string());
//!
//! let plans = Resolver::default().resolve(&instructions, &contents);
//! assert_eq!(plans[0].final_content, "A\nB2\nC\n");
//! ```

mod error;
mod fragment;
mod instruction;
mod resolve;
mod stitch;
mod verify;

pub use error::{PatchError, PatchResult, RejectReason};
pub use fragment::{Fragment, FragmentSource};
pub use instruction::{EditInstruction, FragmentPatch};
pub use resolve::{MaterializationPlan, RejectedPatch, Relocation, Resolver};
pub use stitch::{dominant_line_ending, stitch, LineEnding, Splice};
pub use verify::{verify_patch, Verdict, DEFAULT_MAX_RELOCATION_LINES};
