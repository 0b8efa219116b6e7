//! Reference-log backend.
//!
//! Stores pre/post images as blobs in the repository's git object
//! database. Each batch owns two refs:
//! ```text
//! refs/emend/<batch_id>/pre
//! refs/emend/<batch_id>/post
//! ```
//! each pointing at a commit whose tree maps repository-relative paths
//! to the stored blobs. Image locators take the form
//! `refname:repo_rel_path` and `resolve` reads through the ref.
//! Identical content deduplicates for free in the object store.
//! Pruning deletes the refs; unreachable objects are reclaimed by
//! git's own gc.
//!
//! Requires the repository to actually be a git repository; opening
//! the backend fails otherwise.

use crate::{ImageRef, SnapshotError, SnapshotResult, StorageBackend};
use async_trait::async_trait;
use git2::{IndexEntry, IndexTime, Repository, Signature};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Git-object-database payload storage.
pub struct RefLogBackend {
    repo_root: PathBuf,
    // Ref updates read-modify-write the batch tree, so concurrent
    // per-file calls must serialize.
    write_lock: Arc<Mutex<()>>,
}

impl RefLogBackend {
    /// Open the backend for a repository root. Fails when no git
    /// repository is present there.
    pub fn open(repo_root: impl Into<PathBuf>) -> SnapshotResult<Self> {
        let repo_root = repo_root.into();
        Repository::open(&repo_root).map_err(|e| {
            SnapshotError::backend(format!(
                "reference-log backend requires a git repository at {}: {}",
                repo_root.display(),
                e.message()
            ))
        })?;

        Ok(Self {
            repo_root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn ref_name(batch_id: u64, side: &str) -> String {
        format!("refs/emend/{batch_id:06}/{side}")
    }

    fn rel_str(path: &Path) -> SnapshotResult<String> {
        path.to_str()
            .map(str::to_string)
            .ok_or_else(|| SnapshotError::validation(format!("non-utf8 path: {}", path.display())))
    }

    async fn store(
        &self,
        refname: String,
        rel: String,
        data: Vec<u8>,
        message: String,
    ) -> SnapshotResult<ImageRef> {
        let _serialize = self.write_lock.lock().await;
        let repo_root = self.repo_root.clone();
        let locator = format!("{refname}:{rel}");

        tokio::task::spawn_blocking(move || -> SnapshotResult<()> {
            let repo = Repository::open(&repo_root)?;
            upsert_entry(&repo, &refname, &rel, &data, &message)?;
            Ok(())
        })
        .await
        .map_err(|e| SnapshotError::backend(format!("storage task failed: {e}")))??;

        Ok(ImageRef::Stored(locator))
    }
}

/// Write `data` as a blob and re-commit the ref's tree with the blob
/// at `rel`. The previous commit (if any) becomes the parent, so each
/// batch ref is itself a small append-only log.
fn upsert_entry(
    repo: &Repository,
    refname: &str,
    rel: &str,
    data: &[u8],
    message: &str,
) -> Result<(), git2::Error> {
    let blob = repo.blob(data)?;

    let parent = repo
        .find_reference(refname)
        .and_then(|r| r.peel_to_commit())
        .ok();

    let mut index = git2::Index::new()?;
    if let Some(ref commit) = parent {
        index.read_tree(&commit.tree()?)?;
    }

    let entry = IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: data.len() as u32,
        id: blob,
        flags: 0,
        flags_extended: 0,
        path: rel.as_bytes().to_vec(),
    };
    index.add(&entry)?;

    let tree_oid = index.write_tree_to(repo)?;
    let tree = repo.find_tree(tree_oid)?;

    let sig = Signature::now("emend", "emend@localhost")?;
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some(refname), &sig, &sig, message, &tree, &parents)?;

    Ok(())
}

#[async_trait]
impl StorageBackend for RefLogBackend {
    async fn capture_pre_image(&self, batch_id: u64, path: &Path) -> SnapshotResult<ImageRef> {
        let src = self.repo_root.join(path);

        let data = match fs::read(&src).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "pre-image of a file that does not exist");
                return Ok(ImageRef::Absent);
            }
            Err(e) => return Err(e.into()),
        };

        let rel = Self::rel_str(path)?;
        let refname = Self::ref_name(batch_id, "pre");
        let message = format!("emend batch {batch_id} pre-image: {rel}");
        let image = self.store(refname, rel, data, message).await?;

        debug!(path = %path.display(), batch = batch_id, "captured pre-image");
        Ok(image)
    }

    async fn write_post_image(
        &self,
        batch_id: u64,
        path: &Path,
        content: Option<&str>,
    ) -> SnapshotResult<ImageRef> {
        let Some(content) = content else {
            return Ok(ImageRef::Absent);
        };

        let rel = Self::rel_str(path)?;
        let refname = Self::ref_name(batch_id, "post");
        let message = format!("emend batch {batch_id} post-image: {rel}");
        let image = self
            .store(refname, rel, content.as_bytes().to_vec(), message)
            .await?;

        debug!(path = %path.display(), batch = batch_id, "stored post-image");
        Ok(image)
    }

    async fn resolve(&self, image: &ImageRef) -> SnapshotResult<Option<String>> {
        let ImageRef::Stored(locator) = image else {
            return Ok(None);
        };

        let (refname, rel) = locator
            .split_once(':')
            .ok_or_else(|| SnapshotError::backend(format!("invalid image locator: {locator}")))?;
        let refname = refname.to_string();
        let rel = rel.to_string();
        let repo_root = self.repo_root.clone();
        let locator = locator.clone();

        let content = tokio::task::spawn_blocking(move || -> SnapshotResult<String> {
            let repo = Repository::open(&repo_root)?;
            let reference = repo
                .find_reference(&refname)
                .map_err(|_| SnapshotError::not_found(format!("image payload {locator}")))?;
            let tree = reference.peel_to_commit()?.tree()?;
            let entry = tree
                .get_path(Path::new(&rel))
                .map_err(|_| SnapshotError::not_found(format!("image payload {locator}")))?;
            let object = entry.to_object(&repo)?;
            let blob = object
                .into_blob()
                .map_err(|_| SnapshotError::backend(format!("locator is not a blob: {locator}")))?;
            String::from_utf8(blob.content().to_vec())
                .map_err(|e| SnapshotError::backend(format!("non-utf8 payload {locator}: {e}")))
        })
        .await
        .map_err(|e| SnapshotError::backend(format!("storage task failed: {e}")))??;

        Ok(Some(content))
    }

    async fn prune(&self, batch_ids: &[u64]) -> SnapshotResult<()> {
        let _serialize = self.write_lock.lock().await;
        let repo_root = self.repo_root.clone();
        let ids = batch_ids.to_vec();

        tokio::task::spawn_blocking(move || -> SnapshotResult<()> {
            let repo = Repository::open(&repo_root)?;
            for id in ids {
                for side in ["pre", "post"] {
                    match repo.find_reference(&RefLogBackend::ref_name(id, side)) {
                        Ok(mut reference) => {
                            reference.delete()?;
                            info!(batch = id, side, "pruned batch ref");
                        }
                        Err(_) => {}
                    }
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| SnapshotError::backend(format!("storage task failed: {e}")))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RefLogBackend) {
        let dir = TempDir::new().unwrap();
        Repository::init(dir.path()).unwrap();
        let backend = RefLogBackend::open(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_open_requires_git_repository() {
        let dir = TempDir::new().unwrap();
        let result = RefLogBackend::open(dir.path());
        assert!(matches!(result, Err(SnapshotError::Backend(_))));
    }

    #[tokio::test]
    async fn test_capture_round_trip() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();

        let image = backend
            .capture_pre_image(1, Path::new("a.txt"))
            .await
            .unwrap();
        match &image {
            ImageRef::Stored(locator) => {
                assert_eq!(locator, "refs/emend/000001/pre:a.txt");
            }
            ImageRef::Absent => panic!("expected stored image"),
        }

        let content = backend.resolve(&image).await.unwrap();
        assert_eq!(content.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let (_dir, backend) = setup();

        let image = backend
            .capture_pre_image(1, Path::new("ghost.txt"))
            .await
            .unwrap();
        assert_eq!(image, ImageRef::Absent);
    }

    #[tokio::test]
    async fn test_two_files_share_one_batch_ref() {
        let (dir, backend) = setup();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "a\n").unwrap();
        std::fs::write(dir.path().join("src/b.rs"), "b\n").unwrap();

        let a = backend
            .capture_pre_image(4, Path::new("src/a.rs"))
            .await
            .unwrap();
        let b = backend
            .capture_pre_image(4, Path::new("src/b.rs"))
            .await
            .unwrap();

        assert_eq!(backend.resolve(&a).await.unwrap().as_deref(), Some("a\n"));
        assert_eq!(backend.resolve(&b).await.unwrap().as_deref(), Some("b\n"));
    }

    #[tokio::test]
    async fn test_post_image_and_deletion() {
        let (_dir, backend) = setup();

        let stored = backend
            .write_post_image(2, Path::new("new.txt"), Some("fresh\n"))
            .await
            .unwrap();
        assert_eq!(
            backend.resolve(&stored).await.unwrap().as_deref(),
            Some("fresh\n")
        );

        let deleted = backend
            .write_post_image(2, Path::new("old.txt"), None)
            .await
            .unwrap();
        assert_eq!(deleted, ImageRef::Absent);
    }

    #[tokio::test]
    async fn test_prune_deletes_refs() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("a.txt"), "content\n").unwrap();

        let image = backend
            .capture_pre_image(3, Path::new("a.txt"))
            .await
            .unwrap();
        backend.prune(&[3]).await.unwrap();

        let result = backend.resolve(&image).await;
        assert!(matches!(result, Err(SnapshotError::NotFound(_))));
    }
}
