//! Append-only batch metadata index.
//!
//! One JSON document per batch at `.emend/history/<zero-padded id>.json`.
//! Documents are written atomically (temp file + rename). Records are
//! appended as batches finish and only ever touched again for the
//! lifecycle transition to a `Pruned` tombstone; the sequence of ids
//! is never reordered or compacted.

use crate::{Batch, SnapshotError, SnapshotResult};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

/// The batch metadata index for one repository.
#[derive(Debug, Clone)]
pub struct HistoryIndex {
    dir: PathBuf,
}

impl HistoryIndex {
    /// Create an index rooted at the given directory
    /// (`.emend/history`). The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn doc_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id:06}.json"))
    }

    /// Write a batch record, replacing any prior document for the same
    /// id (used for status transitions).
    pub async fn save(&self, batch: &Batch) -> SnapshotResult<()> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.doc_path(batch.id);
        debug!(path = %path.display(), "writing batch record");

        let content = serde_json::to_string_pretty(batch)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    /// Read a batch record by id.
    pub async fn get(&self, id: u64) -> SnapshotResult<Option<Batch>> {
        let path = self.doc_path(id);

        match fs::read_to_string(&path).await {
            Ok(content) => {
                let batch: Batch = serde_json::from_str(&content)?;
                Ok(Some(batch))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SnapshotError::Io(e)),
        }
    }

    /// All batch records, most recent first. Unreadable documents are
    /// skipped with a warning rather than failing the listing.
    pub async fn list(&self) -> SnapshotResult<Vec<Batch>> {
        let mut ids = self.ids().await?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut batches = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(id).await {
                Ok(Some(batch)) => batches.push(batch),
                Ok(None) => {}
                Err(e) => warn!(id, error = %e, "failed to load batch record"),
            }
        }

        Ok(batches)
    }

    /// The next gap-free batch id. Callers must hold the session lock
    /// so concurrent allocations cannot collide.
    pub async fn next_id(&self) -> SnapshotResult<u64> {
        let ids = self.ids().await?;
        Ok(ids.into_iter().max().unwrap_or(0) + 1)
    }

    async fn ids(&self) -> SnapshotResult<Vec<u64>> {
        let mut ids = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(SnapshotError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }
}
