//! `diff` - show a file's change in a batch.
//!
//! The engine resolves both image contents; the diff itself is
//! rendered here.

use crate::commands::open_manager;
use anyhow::Result;
use emend_snapshot::SnapshotError;
use similar::{ChangeTag, TextDiff};
use std::path::Path;

pub async fn run(root: &Path, file: &Path, batch: Option<u64>) -> Result<()> {
    let (_config, manager) = open_manager(root).await?;

    let batch_id = match batch {
        Some(id) => id,
        None => manager
            .latest_batch_for(file)
            .await?
            .map(|b| b.id)
            .ok_or_else(|| {
                SnapshotError::not_found(format!(
                    "no committed batch touches {}",
                    file.display()
                ))
            })?,
    };

    let (pre, post) = manager.diff(batch_id, file).await?;
    let old = pre.as_deref().unwrap_or("");
    let new = post.as_deref().unwrap_or("");

    if old == new {
        println!("No changes in batch {batch_id:06} for {}", file.display());
        return Ok(());
    }

    print!("{}", render_diff(old, new, file));
    Ok(())
}

/// Generate a unified diff between two strings.
fn render_diff(old: &str, new: &str, path: &Path) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    output.push_str(&format!("--- a/{}\n", path.display()));
    output.push_str(&format!("+++ b/{}\n", path.display()));

    for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
        if idx > 0 {
            output.push_str("...\n");
        }

        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };

                output.push_str(sign);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push('\n');
                }
            }
        }
    }

    output
}
