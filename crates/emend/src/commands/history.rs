//! `history` - list batches, most recent first.

use crate::commands::{open_manager, truncate_description};
use anyhow::Result;
use std::path::Path;

pub async fn run(root: &Path, limit: Option<usize>) -> Result<()> {
    let (_config, manager) = open_manager(root).await?;
    let batches = manager.list(limit).await?;

    if batches.is_empty() {
        println!("No batches yet.");
        return Ok(());
    }

    for batch in &batches {
        let restore_note = batch
            .restores
            .map(|id| format!("  (restores {id:06})"))
            .unwrap_or_default();

        println!(
            "{:06}  {:<9}  {}  {:>2} file(s)  {}{}",
            batch.id,
            batch.status.to_string(),
            batch.created_at.format("%Y-%m-%d %H:%M:%S"),
            batch.files.len(),
            truncate_description(&batch.description, 32),
            restore_note,
        );
    }

    Ok(())
}
