//! Snapshot manager.
//!
//! Orchestrates capture → apply → commit for one repository and
//! exposes history, diff, restore and retention on top of the storage
//! backend. A batch moves `Pending → Captured → Committed`, with
//! `Failed` reachable from `Captured` when a write or backend call
//! fails partway; in that case every already-written file is rolled
//! back to its pre-image and paths that cannot be rolled back are
//! reported for manual reconciliation.

use crate::backend::{CopyBackend, RefLogBackend, StorageBackend};
use crate::index::HistoryIndex;
use crate::lock::{SessionGuard, SessionLock};
use crate::{
    BackendKind, Batch, BatchStatus, EngineConfig, FileRecord, ImageRef, SnapshotError,
    SnapshotResult,
};
use chrono::{Duration, Utc};
use futures::future;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A batch that has captured its pre-images and holds the session
/// lock. Consumed by [`SnapshotManager::commit_batch`]; dropping it
/// instead abandons the batch and releases the lock without touching
/// the working tree.
pub struct InFlightBatch {
    batch: Batch,
    guard: SessionGuard,
    cancel: CancellationToken,
}

impl InFlightBatch {
    /// The batch id allocated for this in-flight batch.
    pub fn id(&self) -> u64 {
        self.batch.id
    }

    /// The captured batch record.
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Token that cancels the commit; cancellation mid-commit takes
    /// the same rollback path as a backend failure.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// The snapshot engine for one repository.
///
/// Each instance owns its own session lock, so engines for different
/// repositories coexist in one process.
pub struct SnapshotManager {
    repo_root: PathBuf,
    backend: Arc<dyn StorageBackend>,
    index: HistoryIndex,
    lock: SessionLock,
}

impl SnapshotManager {
    /// Open the engine for a repository with the backend named by the
    /// configuration.
    pub async fn open(
        repo_root: impl Into<PathBuf>,
        config: &EngineConfig,
    ) -> SnapshotResult<Self> {
        let repo_root = repo_root.into();
        let state_dir = emend_util::path::state_dir(&repo_root);

        let backend: Arc<dyn StorageBackend> = match config.backend {
            BackendKind::Copy => Arc::new(CopyBackend::new(&repo_root, &state_dir)),
            BackendKind::GitRef => Arc::new(RefLogBackend::open(&repo_root)?),
        };

        Self::with_backend(repo_root, backend).await
    }

    /// Open the engine with an explicit backend. The manager never
    /// depends on which implementation it is handed.
    pub async fn with_backend(
        repo_root: impl Into<PathBuf>,
        backend: Arc<dyn StorageBackend>,
    ) -> SnapshotResult<Self> {
        let repo_root = repo_root.into();
        let state_dir = emend_util::path::state_dir(&repo_root);
        fs::create_dir_all(state_dir.join("history")).await?;

        Ok(Self {
            index: HistoryIndex::new(state_dir.join("history")),
            lock: SessionLock::new(&state_dir),
            backend,
            repo_root,
        })
    }

    /// The repository root this engine operates on.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Begin a batch, waiting for any in-flight batch in this process
    /// to finish.
    pub async fn begin_batch(
        &self,
        paths: &[PathBuf],
        description: &str,
    ) -> SnapshotResult<InFlightBatch> {
        let guard = self.lock.acquire().await?;
        self.begin_locked(guard, paths, description, None).await
    }

    /// Begin a batch or fail fast with [`SnapshotError::Busy`] when
    /// one is already in flight.
    pub async fn try_begin_batch(
        &self,
        paths: &[PathBuf],
        description: &str,
    ) -> SnapshotResult<InFlightBatch> {
        let guard = self.lock.try_acquire()?;
        self.begin_locked(guard, paths, description, None).await
    }

    async fn begin_locked(
        &self,
        guard: SessionGuard,
        paths: &[PathBuf],
        description: &str,
        restores: Option<u64>,
    ) -> SnapshotResult<InFlightBatch> {
        if paths.is_empty() {
            return Err(SnapshotError::validation("batch must touch at least one file"));
        }

        // One record per path per batch.
        let mut rels: Vec<PathBuf> = Vec::new();
        for path in paths {
            let rel = self.normalize_rel(path)?;
            if !rels.contains(&rel) {
                rels.push(rel);
            }
        }

        // Ids are allocated under the session lock, so they stay
        // gap-free and monotonic.
        let id = self.index.next_id().await?;
        let mut batch = Batch::new(id, description);
        batch.restores = restores;

        // Per-file captures are independent; fan out and wait for all.
        let captures = rels.iter().map(|rel| {
            let backend = Arc::clone(&self.backend);
            let rel = rel.clone();
            async move {
                let image = backend.capture_pre_image(id, &rel).await?;
                Ok::<(PathBuf, ImageRef), SnapshotError>((rel, image))
            }
        });

        for result in future::join_all(captures).await {
            let (path, pre_image) = result?;
            batch.files.push(FileRecord {
                path,
                pre_image,
                post_image: ImageRef::Absent,
            });
        }

        batch.status = BatchStatus::Captured;
        debug!(batch = id, files = batch.files.len(), "batch captured");

        Ok(InFlightBatch {
            batch,
            guard,
            cancel: CancellationToken::new(),
        })
    }

    /// Commit an in-flight batch.
    ///
    /// `contents` maps every captured path to the content the working
    /// tree should hold afterwards; `None` deletes the file. Files are
    /// written first, then post-images are recorded, each phase fanned
    /// out per file with a completion barrier. Any failure or
    /// cancellation rolls already-written files back to their
    /// pre-images and records the batch as `Failed`.
    pub async fn commit_batch(
        &self,
        inflight: InFlightBatch,
        contents: HashMap<PathBuf, Option<String>>,
    ) -> SnapshotResult<Batch> {
        let InFlightBatch {
            mut batch,
            guard,
            cancel,
        } = inflight;

        let mut work: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(contents.len());
        for (path, content) in contents {
            let rel = self.normalize_rel(&path)?;
            if !batch.contains(&rel) {
                return Err(SnapshotError::validation(format!(
                    "path {} was not captured by batch {}",
                    rel.display(),
                    batch.id
                )));
            }
            work.push((rel, content));
        }
        for record in &batch.files {
            if !work.iter().any(|(p, _)| p == &record.path) {
                return Err(SnapshotError::validation(format!(
                    "no content supplied for captured path {}",
                    record.path.display()
                )));
            }
        }

        if cancel.is_cancelled() {
            return self.fail_batch(batch, &[], SnapshotError::Cancelled).await;
        }

        // Phase 1: working tree writes.
        let writes = work.iter().map(|(rel, content)| {
            let root = self.repo_root.clone();
            let rel = rel.clone();
            let content = content.clone();
            async move {
                write_worktree_file(&root, &rel, content.as_deref())
                    .await
                    .map(|()| rel)
            }
        });

        let mut written: Vec<PathBuf> = Vec::new();
        let mut first_error: Option<SnapshotError> = None;
        for result in future::join_all(writes).await {
            match result {
                Ok(rel) => written.push(rel),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if first_error.is_none() && cancel.is_cancelled() {
            first_error = Some(SnapshotError::Cancelled);
        }
        if let Some(cause) = first_error {
            return self.fail_batch(batch, &written, cause).await;
        }

        // Phase 2: post-images.
        let posts = work.iter().map(|(rel, content)| {
            let backend = Arc::clone(&self.backend);
            let rel = rel.clone();
            let content = content.clone();
            let id = batch.id;
            async move {
                backend
                    .write_post_image(id, &rel, content.as_deref())
                    .await
                    .map(|image| (rel, image))
            }
        });

        let mut post_images: Vec<(PathBuf, ImageRef)> = Vec::new();
        for result in future::join_all(posts).await {
            match result {
                Ok(pair) => post_images.push(pair),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if first_error.is_none() && cancel.is_cancelled() {
            first_error = Some(SnapshotError::Cancelled);
        }
        if let Some(cause) = first_error {
            return self.fail_batch(batch, &written, cause).await;
        }

        for (rel, image) in post_images {
            if let Some(record) = batch.files.iter_mut().find(|r| r.path == rel) {
                record.post_image = image;
            }
        }

        batch.status = BatchStatus::Committed;
        self.index.save(&batch).await?;
        info!(batch = batch.id, files = batch.files.len(), "batch committed");

        drop(guard);
        Ok(batch)
    }

    /// Roll back written files, record the batch as `Failed` and
    /// surface the cause. Paths whose rollback also fails are reported
    /// as inconsistent rather than silently dropped.
    async fn fail_batch(
        &self,
        mut batch: Batch,
        written: &[PathBuf],
        cause: SnapshotError,
    ) -> SnapshotResult<Batch> {
        warn!(batch = batch.id, error = %cause, "commit failed, rolling back");

        let mut inconsistent: Vec<PathBuf> = Vec::new();
        for rel in written {
            let Some(record) = batch.record_for(rel) else {
                continue;
            };

            let rolled_back = match self.backend.resolve(&record.pre_image).await {
                Ok(content) => write_worktree_file(&self.repo_root, rel, content.as_deref())
                    .await
                    .is_ok(),
                Err(_) => false,
            };

            if rolled_back {
                debug!(path = %rel.display(), "rolled back");
            } else {
                inconsistent.push(rel.clone());
            }
        }

        // Failed batches stay in the index so ids remain visibly
        // gap-free.
        batch.status = BatchStatus::Failed;
        if let Err(e) = self.index.save(&batch).await {
            warn!(batch = batch.id, error = %e, "failed to record failed batch");
        }

        if inconsistent.is_empty() {
            Err(cause)
        } else {
            Err(SnapshotError::Inconsistent {
                cause: cause.to_string(),
                paths: inconsistent,
            })
        }
    }

    /// Resolve the pre/post contents of a file in a committed batch.
    /// The caller renders the textual diff; the engine only returns
    /// both sides.
    pub async fn diff(
        &self,
        batch_id: u64,
        path: &Path,
    ) -> SnapshotResult<(Option<String>, Option<String>)> {
        let batch = self.get_committed(batch_id).await?;
        let rel = self.normalize_rel(path)?;
        let record = batch.record_for(&rel).ok_or_else(|| {
            SnapshotError::not_found(format!("file {} in batch {batch_id}", rel.display()))
        })?;

        let pre = self.backend.resolve(&record.pre_image).await?;
        let post = self.backend.resolve(&record.post_image).await?;
        Ok((pre, post))
    }

    /// Write a committed batch's pre-images back to the working tree.
    ///
    /// The restore runs as a fresh begin/commit cycle whose
    /// post-images equal the restored content, so the restore is
    /// itself undoable and history stays strictly append-only. The new
    /// batch carries `restores = Some(batch_id)`.
    pub async fn restore(&self, batch_id: u64, path: Option<&Path>) -> SnapshotResult<Batch> {
        let source = self.get_committed(batch_id).await?;

        let records: Vec<&FileRecord> = match path {
            Some(p) => {
                let rel = self.normalize_rel(p)?;
                let record = source.record_for(&rel).ok_or_else(|| {
                    SnapshotError::not_found(format!(
                        "file {} in batch {batch_id}",
                        rel.display()
                    ))
                })?;
                vec![record]
            }
            None => source.files.iter().collect(),
        };

        let mut contents: HashMap<PathBuf, Option<String>> = HashMap::new();
        for record in &records {
            let content = self.backend.resolve(&record.pre_image).await?;
            contents.insert(record.path.clone(), content);
        }

        let paths: Vec<PathBuf> = contents.keys().cloned().collect();
        let guard = self.lock.acquire().await?;
        let inflight = self
            .begin_locked(
                guard,
                &paths,
                &format!("restore of batch {batch_id}"),
                Some(batch_id),
            )
            .await?;

        let batch = self.commit_batch(inflight, contents).await?;
        info!(batch = batch.id, restores = batch_id, "restore committed");
        Ok(batch)
    }

    /// Batches, most recent first, tombstones included.
    pub async fn list(&self, limit: Option<usize>) -> SnapshotResult<Vec<Batch>> {
        let mut batches = self.index.list().await?;
        if let Some(limit) = limit {
            batches.truncate(limit);
        }
        Ok(batches)
    }

    /// The most recent committed batch, if any.
    pub async fn latest_committed(&self) -> SnapshotResult<Option<Batch>> {
        Ok(self
            .index
            .list()
            .await?
            .into_iter()
            .find(|b| b.status == BatchStatus::Committed))
    }

    /// The most recent committed batch touching a path.
    pub async fn latest_batch_for(&self, path: &Path) -> SnapshotResult<Option<Batch>> {
        let rel = self.normalize_rel(path)?;
        Ok(self
            .index
            .list()
            .await?
            .into_iter()
            .find(|b| b.status == BatchStatus::Committed && b.contains(&rel)))
    }

    /// Drop the payloads of all committed batches beyond the `keep`
    /// most recent. Their index records remain as `Pruned` tombstones,
    /// so `list` output stays stable; `diff`/`restore` against them
    /// fail with not-found.
    pub async fn prune(&self, keep: usize) -> SnapshotResult<u32> {
        let doomed: Vec<Batch> = self
            .index
            .list()
            .await?
            .into_iter()
            .filter(|b| b.status == BatchStatus::Committed)
            .skip(keep)
            .collect();
        self.tombstone(doomed).await
    }

    /// Drop the payloads of committed batches older than the given
    /// horizon.
    pub async fn cleanup(&self, older_than_days: u32) -> SnapshotResult<u32> {
        let cutoff = Utc::now() - Duration::days(older_than_days as i64);
        let doomed: Vec<Batch> = self
            .index
            .list()
            .await?
            .into_iter()
            .filter(|b| b.status == BatchStatus::Committed && b.created_at < cutoff)
            .collect();
        self.tombstone(doomed).await
    }

    async fn tombstone(&self, doomed: Vec<Batch>) -> SnapshotResult<u32> {
        if doomed.is_empty() {
            return Ok(0);
        }

        let ids: Vec<u64> = doomed.iter().map(|b| b.id).collect();
        self.backend.prune(&ids).await?;

        for mut batch in doomed {
            batch.status = BatchStatus::Pruned;
            self.index.save(&batch).await?;
        }

        info!(count = ids.len(), "pruned batches");
        Ok(ids.len() as u32)
    }

    async fn get_committed(&self, batch_id: u64) -> SnapshotResult<Batch> {
        let batch = self
            .index
            .get(batch_id)
            .await?
            .ok_or_else(|| SnapshotError::not_found(format!("batch {batch_id}")))?;

        match batch.status {
            BatchStatus::Committed => Ok(batch),
            BatchStatus::Pruned => Err(SnapshotError::not_found(format!(
                "batch {batch_id} was pruned"
            ))),
            status => Err(SnapshotError::not_found(format!(
                "batch {batch_id} is {status}, not committed"
            ))),
        }
    }

    /// Normalize a path to repository-relative form, rejecting paths
    /// that escape the root.
    fn normalize_rel(&self, path: &Path) -> SnapshotResult<PathBuf> {
        let rel = if path.is_absolute() {
            emend_util::path::relative_to(path, &self.repo_root).ok_or_else(|| {
                SnapshotError::validation(format!(
                    "path {} is outside the repository root",
                    path.display()
                ))
            })?
        } else {
            path.to_path_buf()
        };

        if !emend_util::path::is_clean_relative(&rel) {
            return Err(SnapshotError::validation(format!(
                "path {} escapes the repository root",
                rel.display()
            )));
        }

        Ok(emend_util::path::normalize(&rel))
    }
}

/// Write or delete a working-tree file. Writes go to a temp file in
/// the same directory and are renamed into place.
async fn write_worktree_file(
    root: &Path,
    rel: &Path,
    content: Option<&str>,
) -> SnapshotResult<()> {
    let target = root.join(rel);

    let Some(content) = content else {
        return match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
    };

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_name = format!(
        ".{}.{}.emend.tmp",
        target
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default(),
        std::process::id()
    );
    let temp_path = target
        .parent()
        .map(|p| p.join(&temp_name))
        .unwrap_or_else(|| PathBuf::from(&temp_name));

    fs::write(&temp_path, content).await?;
    let rename_result = fs::rename(&temp_path, &target).await;
    if rename_result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    rename_result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SnapshotManager) {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path(), &EngineConfig::default())
            .await
            .unwrap();
        (dir, manager)
    }

    async fn commit_one(manager: &SnapshotManager, path: &str, content: &str, description: &str) -> Batch {
        let inflight = manager
            .begin_batch(&[PathBuf::from(path)], description)
            .await
            .unwrap();
        let mut contents = HashMap::new();
        contents.insert(PathBuf::from(path), Some(content.to_string()));
        manager.commit_batch(inflight, contents).await.unwrap()
    }

    #[tokio::test]
    async fn test_begin_commit_and_diff() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "old\n").unwrap();

        let batch = commit_one(&manager, "a.txt", "new\n", "edit a").await;
        assert_eq!(batch.status, BatchStatus::Committed);
        assert_eq!(batch.id, 1);

        let on_disk = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(on_disk, "new\n");

        let (pre, post) = manager.diff(batch.id, Path::new("a.txt")).await.unwrap();
        assert_eq!(pre.as_deref(), Some("old\n"));
        assert_eq!(post.as_deref(), Some("new\n"));
    }

    #[tokio::test]
    async fn test_missing_file_records_absent_pre_image() {
        let (dir, manager) = setup().await;

        let batch = commit_one(&manager, "fresh.txt", "created\n", "create").await;
        assert_eq!(
            batch.record_for(Path::new("fresh.txt")).unwrap().pre_image,
            ImageRef::Absent
        );

        let (pre, post) = manager.diff(batch.id, Path::new("fresh.txt")).await.unwrap();
        assert_eq!(pre, None);
        assert_eq!(post.as_deref(), Some("created\n"));

        assert!(dir.path().join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn test_idempotent_full_edit() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "orig\n").unwrap();

        commit_one(&manager, "a.txt", "final\n", "first").await;
        let second = commit_one(&manager, "a.txt", "final\n", "second").await;

        let on_disk = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(on_disk, "final\n");

        // The second batch's pre and post images agree, so the diff
        // between the two commits is empty.
        let (pre, post) = manager.diff(second.id, Path::new("a.txt")).await.unwrap();
        assert_eq!(pre, post);
    }

    #[tokio::test]
    async fn test_restore_creates_new_batch() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "v1\n").unwrap();

        commit_one(&manager, "a.txt", "v2\n", "to v2").await;
        commit_one(&manager, "a.txt", "v3\n", "to v3").await;

        let restored = manager.restore(1, None).await.unwrap();
        assert_eq!(restored.id, 3);
        assert_eq!(restored.restores, Some(1));

        let on_disk = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(on_disk, "v1\n");

        // History stays append-only: all three batches are listed.
        let batches = manager.list(None).await.unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].id, 3);
    }

    #[tokio::test]
    async fn test_restore_is_itself_undoable() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "v1\n").unwrap();

        commit_one(&manager, "a.txt", "v2\n", "to v2").await;
        let restored = manager.restore(1, None).await.unwrap();

        // Restoring the restore batch brings v2 back.
        manager.restore(restored.id, None).await.unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(on_disk, "v2\n");
    }

    #[tokio::test]
    async fn test_restore_single_path() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "a1\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b1\n").unwrap();

        let inflight = manager
            .begin_batch(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")], "both")
            .await
            .unwrap();
        let mut contents = HashMap::new();
        contents.insert(PathBuf::from("a.txt"), Some("a2\n".to_string()));
        contents.insert(PathBuf::from("b.txt"), Some("b2\n".to_string()));
        manager.commit_batch(inflight, contents).await.unwrap();

        manager.restore(1, Some(Path::new("a.txt"))).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "a1\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "b2\n"
        );
    }

    #[tokio::test]
    async fn test_prune_retention() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "v0\n").unwrap();

        for i in 1..=5 {
            commit_one(&manager, "a.txt", &format!("v{i}\n"), &format!("edit {i}")).await;
        }

        let pruned = manager.prune(2).await.unwrap();
        assert_eq!(pruned, 3);

        // The two most recent stay resolvable.
        assert!(manager.diff(5, Path::new("a.txt")).await.is_ok());
        assert!(manager.diff(4, Path::new("a.txt")).await.is_ok());

        // A pruned batch fails with not-found for diff and restore.
        let diff_result = manager.diff(2, Path::new("a.txt")).await;
        assert!(matches!(diff_result, Err(SnapshotError::NotFound(_))));
        let restore_result = manager.restore(2, None).await;
        assert!(matches!(restore_result, Err(SnapshotError::NotFound(_))));

        // Tombstones keep the listing stable.
        let batches = manager.list(None).await.unwrap();
        assert_eq!(batches.len(), 5);
        assert_eq!(batches[4].status, BatchStatus::Pruned);
    }

    #[tokio::test]
    async fn test_cleanup_by_age() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "v0\n").unwrap();

        commit_one(&manager, "a.txt", "v1\n", "recent").await;

        // Nothing is older than 30 days yet.
        assert_eq!(manager.cleanup(30).await.unwrap(), 0);

        // A zero-day horizon prunes everything committed.
        assert_eq!(manager.cleanup(0).await.unwrap(), 1);
        let batches = manager.list(None).await.unwrap();
        assert_eq!(batches[0].status, BatchStatus::Pruned);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let (_dir, manager) = setup().await;
        let result = manager.diff(42, Path::new("a.txt")).await;
        assert!(matches!(result, Err(SnapshotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_try_begin_while_in_flight_is_busy() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();

        let inflight = manager
            .begin_batch(&[PathBuf::from("a.txt")], "held")
            .await
            .unwrap();

        let second = manager
            .try_begin_batch(&[PathBuf::from("a.txt")], "contender")
            .await;
        assert!(matches!(second, Err(SnapshotError::Busy)));

        // Finishing the first batch releases the lock.
        let mut contents = HashMap::new();
        contents.insert(PathBuf::from("a.txt"), Some("y\n".to_string()));
        manager.commit_batch(inflight, contents).await.unwrap();

        assert!(manager
            .try_begin_batch(&[PathBuf::from("a.txt")], "after")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_commit_unknown_path_rejected() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "x\n").unwrap();

        let inflight = manager
            .begin_batch(&[PathBuf::from("a.txt")], "strict")
            .await
            .unwrap();

        let mut contents = HashMap::new();
        contents.insert(PathBuf::from("a.txt"), Some("y\n".to_string()));
        contents.insert(PathBuf::from("sneaky.txt"), Some("z\n".to_string()));

        let result = manager.commit_batch(inflight, contents).await;
        assert!(matches!(result, Err(SnapshotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_path_escaping_root_rejected() {
        let (_dir, manager) = setup().await;
        let result = manager
            .begin_batch(&[PathBuf::from("../outside.txt")], "escape")
            .await;
        assert!(matches!(result, Err(SnapshotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_deletion_and_restore() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("doomed.txt"), "content\n").unwrap();

        let inflight = manager
            .begin_batch(&[PathBuf::from("doomed.txt")], "delete")
            .await
            .unwrap();
        let mut contents = HashMap::new();
        contents.insert(PathBuf::from("doomed.txt"), None);
        let batch = manager.commit_batch(inflight, contents).await.unwrap();

        assert!(!dir.path().join("doomed.txt").exists());
        assert_eq!(
            batch.record_for(Path::new("doomed.txt")).unwrap().post_image,
            ImageRef::Absent
        );

        manager.restore(batch.id, None).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("doomed.txt")).unwrap(),
            "content\n"
        );
    }

    #[tokio::test]
    async fn test_cancelled_commit_leaves_tree_untouched() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "orig\n").unwrap();

        let inflight = manager
            .begin_batch(&[PathBuf::from("a.txt")], "cancelled")
            .await
            .unwrap();
        inflight.cancellation_token().cancel();

        let mut contents = HashMap::new();
        contents.insert(PathBuf::from("a.txt"), Some("new\n".to_string()));
        let result = manager.commit_batch(inflight, contents).await;
        assert!(matches!(result, Err(SnapshotError::Cancelled)));

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "orig\n"
        );

        // The failed batch is recorded, keeping ids gap-free.
        let batches = manager.list(None).await.unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn test_latest_batch_for_path() {
        let (dir, manager) = setup().await;
        std::fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b\n").unwrap();

        commit_one(&manager, "a.txt", "a2\n", "edit a").await;
        commit_one(&manager, "b.txt", "b2\n", "edit b").await;
        commit_one(&manager, "a.txt", "a3\n", "edit a again").await;

        let latest = manager
            .latest_batch_for(Path::new("a.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, 3);

        let latest_b = manager
            .latest_batch_for(Path::new("b.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest_b.id, 2);

        assert!(manager
            .latest_batch_for(Path::new("c.txt"))
            .await
            .unwrap()
            .is_none());
    }

    // ============================================================
    // Rollback behavior with a failing backend
    // ============================================================

    /// Delegates to a copy backend but fails post-image writes for one
    /// path, to exercise the rollback path.
    struct FailingBackend {
        inner: CopyBackend,
        fail_post_for: PathBuf,
    }

    #[async_trait]
    impl StorageBackend for FailingBackend {
        async fn capture_pre_image(&self, batch_id: u64, path: &Path) -> SnapshotResult<ImageRef> {
            self.inner.capture_pre_image(batch_id, path).await
        }

        async fn write_post_image(
            &self,
            batch_id: u64,
            path: &Path,
            content: Option<&str>,
        ) -> SnapshotResult<ImageRef> {
            if path == self.fail_post_for {
                return Err(SnapshotError::backend("injected post-image failure"));
            }
            self.inner.write_post_image(batch_id, path, content).await
        }

        async fn resolve(&self, image: &ImageRef) -> SnapshotResult<Option<String>> {
            self.inner.resolve(image).await
        }

        async fn prune(&self, batch_ids: &[u64]) -> SnapshotResult<()> {
            self.inner.prune(batch_ids).await
        }
    }

    #[tokio::test]
    async fn test_backend_failure_rolls_back_all_writes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a-orig\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b-orig\n").unwrap();

        let backend = FailingBackend {
            inner: CopyBackend::new(dir.path(), &dir.path().join(".emend")),
            fail_post_for: PathBuf::from("b.txt"),
        };
        let manager = SnapshotManager::with_backend(dir.path(), Arc::new(backend))
            .await
            .unwrap();

        let inflight = manager
            .begin_batch(&[PathBuf::from("a.txt"), PathBuf::from("b.txt")], "doomed")
            .await
            .unwrap();
        let mut contents = HashMap::new();
        contents.insert(PathBuf::from("a.txt"), Some("a-new\n".to_string()));
        contents.insert(PathBuf::from("b.txt"), Some("b-new\n".to_string()));

        let result = manager.commit_batch(inflight, contents).await;
        assert!(matches!(result, Err(SnapshotError::Backend(_))));

        // Both files are back at their pre-images.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "a-orig\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.txt")).unwrap(),
            "b-orig\n"
        );

        let batches = manager.list(None).await.unwrap();
        assert_eq!(batches[0].status, BatchStatus::Failed);

        // A failed batch is not diffable.
        let diff = manager.diff(batches[0].id, Path::new("a.txt")).await;
        assert!(matches!(diff, Err(SnapshotError::NotFound(_))));
    }
}
