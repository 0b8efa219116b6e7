//! Engine configuration.

use crate::SnapshotResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Which storage backend holds batch payloads. Selected once per
/// repository; the choice is persisted so every later invocation
/// resolves the same payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Physical file copies under `.emend/snapshots`.
    #[default]
    Copy,
    /// Blobs in the repository's git object database, addressed via
    /// `refs/emend/*`.
    GitRef,
}

/// Configuration for the snapshot engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage backend for batch payloads.
    pub backend: BackendKind,

    /// How many committed batches `keep` retains by default.
    pub keep_count: usize,

    /// Age-based retention horizon in days.
    pub max_age_days: u32,

    /// Files longer than this skip the relocation search when a
    /// fragment patch mismatches.
    pub max_relocation_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Copy,
            keep_count: 10,
            max_age_days: 30,
            max_relocation_lines: 100_000,
        }
    }
}

impl EngineConfig {
    /// Path of the config document inside a repository.
    pub fn path(repo_root: &Path) -> PathBuf {
        emend_util::path::state_dir(repo_root).join("config.json")
    }

    /// Load the repository's config, falling back to defaults when no
    /// config document exists yet.
    pub async fn load(repo_root: &Path) -> SnapshotResult<Self> {
        let path = Self::path(repo_root);

        match fs::read_to_string(&path).await {
            Ok(content) => {
                let config: Self = serde_json::from_str(&content)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config document, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the config atomically.
    pub async fn save(&self, repo_root: &Path) -> SnapshotResult<()> {
        let path = Self::path(repo_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }
}
