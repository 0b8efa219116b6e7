//! `restore` - write a batch's pre-images back to the working tree.
//!
//! A restore never edits history: it runs as a fresh batch recording a
//! back-reference to the batch it restores, so it can itself be undone.

use crate::commands::open_manager;
use anyhow::Result;
use emend_snapshot::SnapshotError;
use std::path::Path;

pub async fn run(root: &Path, batch: Option<u64>, file: Option<&Path>) -> Result<()> {
    let (_config, manager) = open_manager(root).await?;

    let batch_id = match batch {
        Some(id) => id,
        None => manager
            .latest_committed()
            .await?
            .map(|b| b.id)
            .ok_or_else(|| SnapshotError::not_found("no committed batches to restore"))?,
    };

    let restored = manager.restore(batch_id, file).await?;

    println!(
        "Restored batch {:06} as batch {:06} ({} file(s))",
        batch_id,
        restored.id,
        restored.files.len()
    );

    Ok(())
}
