//! Batch data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Reference to a file image held by the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "locator", rename_all = "snake_case")]
pub enum ImageRef {
    /// The file did not exist when the image was taken.
    Absent,
    /// Backend-interpreted locator for stored content: a
    /// payload-relative file path for the copy backend,
    /// `refname:repo_rel_path` for the reference-log backend.
    Stored(String),
}

/// Before/after references for one file in a batch. Immutable once the
/// batch is committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the repository root.
    pub path: PathBuf,

    /// The file's content before the batch.
    pub pre_image: ImageRef,

    /// The file's content after the batch.
    pub post_image: ImageRef,
}

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, pre-images not yet captured.
    Pending,
    /// Pre-images captured, not yet committed.
    Captured,
    /// All files written and post-images recorded.
    Committed,
    /// The commit failed; the working tree was rolled back.
    Failed,
    /// Retention removed the backend payloads; the record remains as a
    /// tombstone.
    Pruned,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Captured => "captured",
            BatchStatus::Committed => "committed",
            BatchStatus::Failed => "failed",
            BatchStatus::Pruned => "pruned",
        };
        write!(f, "{s}")
    }
}

/// One atomic set of per-file writes plus their before/after
/// references. Batches form a strictly linear, append-only sequence
/// keyed by a gap-free monotonic id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Monotonic batch id, unique per repository.
    pub id: u64,

    /// When the batch was begun.
    pub created_at: DateTime<Utc>,

    /// Why the batch was taken (typically the prompt that produced the
    /// edits).
    pub description: String,

    /// Lifecycle state.
    pub status: BatchStatus,

    /// One record per path touched by the batch.
    pub files: Vec<FileRecord>,

    /// Set when this batch was produced by restoring another batch's
    /// pre-images. History is never edited in place; a restore is a
    /// new batch carrying this back-reference.
    #[serde(default)]
    pub restores: Option<u64>,
}

impl Batch {
    /// Create a new pending batch.
    pub fn new(id: u64, description: impl Into<String>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            description: description.into(),
            status: BatchStatus::Pending,
            files: Vec::new(),
            restores: None,
        }
    }

    /// The record for a path, if the batch touched it.
    pub fn record_for(&self, path: &Path) -> Option<&FileRecord> {
        self.files.iter().find(|r| r.path == path)
    }

    /// Whether the batch touched a path.
    pub fn contains(&self, path: &Path) -> bool {
        self.record_for(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_batch_is_pending() {
        let batch = Batch::new(1, "first batch");
        assert_eq!(batch.id, 1);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert!(batch.files.is_empty());
        assert!(batch.restores.is_none());
    }

    #[test]
    fn test_record_lookup() {
        let mut batch = Batch::new(2, "test");
        batch.files.push(FileRecord {
            path: PathBuf::from("src/main.rs"),
            pre_image: ImageRef::Absent,
            post_image: ImageRef::Stored("000002/post/src/main.rs".to_string()),
        });

        assert!(batch.contains(Path::new("src/main.rs")));
        assert!(!batch.contains(Path::new("src/lib.rs")));
        assert_eq!(
            batch.record_for(Path::new("src/main.rs")).unwrap().pre_image,
            ImageRef::Absent
        );
    }

    #[test]
    fn test_batch_json_round_trip() {
        let mut batch = Batch::new(3, "round trip");
        batch.status = BatchStatus::Committed;
        batch.restores = Some(1);
        batch.files.push(FileRecord {
            path: PathBuf::from("a.txt"),
            pre_image: ImageRef::Stored("000003/pre/a.txt".to_string()),
            post_image: ImageRef::Stored("000003/post/a.txt".to_string()),
        });

        let json = serde_json::to_string(&batch).unwrap();
        let parsed: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, 3);
        assert_eq!(parsed.status, BatchStatus::Committed);
        assert_eq!(parsed.restores, Some(1));
        assert_eq!(parsed.files.len(), 1);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BatchStatus::Committed.to_string(), "committed");
        assert_eq!(BatchStatus::Pruned.to_string(), "pruned");
    }
}
