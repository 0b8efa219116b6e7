//! Command handlers, mapped 1:1 to engine operations.

pub mod apply;
pub mod diff;
pub mod history;
pub mod keep;
pub mod restore;

use anyhow::Result;
use emend_snapshot::{EngineConfig, SnapshotManager};
use std::path::Path;

/// Load the repository config and open the engine with the backend it
/// names.
pub async fn open_manager(root: &Path) -> Result<(EngineConfig, SnapshotManager)> {
    let config = EngineConfig::load(root).await?;
    let manager = SnapshotManager::open(root, &config).await?;
    Ok((config, manager))
}

/// Truncate a batch description for one-line listings.
pub fn truncate_description(text: &str, max_length: usize) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "no description".to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        text.to_string()
    } else {
        let truncated: String = chars[..max_length].iter().collect();
        format!("{truncated}...")
    }
}
