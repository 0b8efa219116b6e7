//! Copy backend.
//!
//! Stores each pre/post image as a physical file copy:
//! ```text
//! .emend/snapshots/
//!   <batch_id>/
//!     pre/<relative_path>
//!     post/<relative_path>
//! ```
//! Simple and dependency-free; disk cost is proportional to the total
//! bytes changed.

use crate::{ImageRef, SnapshotError, SnapshotResult, StorageBackend};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// File-copy payload storage.
pub struct CopyBackend {
    repo_root: PathBuf,
    payload_root: PathBuf,
}

impl CopyBackend {
    /// Create a copy backend storing payloads under
    /// `<state_dir>/snapshots`.
    pub fn new(repo_root: impl Into<PathBuf>, state_dir: &Path) -> Self {
        Self {
            repo_root: repo_root.into(),
            payload_root: state_dir.join("snapshots"),
        }
    }

    fn batch_dir(&self, batch_id: u64) -> PathBuf {
        self.payload_root.join(format!("{batch_id:06}"))
    }

    fn image_path(&self, batch_id: u64, side: &str, path: &Path) -> PathBuf {
        self.batch_dir(batch_id).join(side).join(path)
    }

    fn locator(batch_id: u64, side: &str, path: &Path) -> String {
        format!("{batch_id:06}/{side}/{}", path.display())
    }
}

#[async_trait]
impl StorageBackend for CopyBackend {
    async fn capture_pre_image(&self, batch_id: u64, path: &Path) -> SnapshotResult<ImageRef> {
        let src = self.repo_root.join(path);

        match fs::metadata(&src).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "pre-image of a file that does not exist");
                return Ok(ImageRef::Absent);
            }
            Err(e) => return Err(e.into()),
        }

        let dst = self.image_path(batch_id, "pre", path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, &dst).await.map_err(|e| {
            SnapshotError::backend(format!("failed to copy {}: {e}", src.display()))
        })?;

        debug!(path = %path.display(), batch = batch_id, "captured pre-image");
        Ok(ImageRef::Stored(Self::locator(batch_id, "pre", path)))
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

        let dst = self.image_path(batch_id, "post", path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&dst, content).await.map_err(|e| {
            SnapshotError::backend(format!("failed to store {}: {e}", dst.display()))
        })?;

        debug!(path = %path.display(), batch = batch_id, "stored post-image");
        Ok(ImageRef::Stored(Self::locator(batch_id, "post", path)))
    }

    async fn resolve(&self, image: &ImageRef) -> SnapshotResult<Option<String>> {
        let ImageRef::Stored(locator) = image else {
            return Ok(None);
        };

        let path = emend_util::path::safe_join(&self.payload_root, Path::new(locator))
            .ok_or_else(|| SnapshotError::backend(format!("invalid image locator: {locator}")))?;

        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SnapshotError::not_found(format!("image payload {locator}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn prune(&self, batch_ids: &[u64]) -> SnapshotResult<()> {
        for &id in batch_ids {
            let dir = self.batch_dir(id);
            match fs::remove_dir_all(&dir).await {
                Ok(()) => info!(batch = id, "pruned batch payload"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CopyBackend) {
        let dir = TempDir::new().unwrap();
        let backend = CopyBackend::new(dir.path(), &dir.path().join(".emend"));
        (dir, backend)
    }

    #[tokio::test]
    async fn test_capture_round_trip() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();

        let image = backend
            .capture_pre_image(1, Path::new("a.txt"))
            .await
            .unwrap();
        assert!(matches!(image, ImageRef::Stored(_)));

        let content = backend.resolve(&image).await.unwrap();
        assert_eq!(content.as_deref(), Some("hello\n"));
    }

    #[tokio::test]
    async fn test_round_trip_reflects_capture_time_content() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("a.txt"), "before\n").unwrap();

        let image = backend
            .capture_pre_image(1, Path::new("a.txt"))
            .await
            .unwrap();

        // Mutating the working tree afterwards must not change the image.
        std::fs::write(dir.path().join("a.txt"), "after\n").unwrap();

        let content = backend.resolve(&image).await.unwrap();
        assert_eq!(content.as_deref(), Some("before\n"));
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let (_dir, backend) = setup();

        let image = backend
            .capture_pre_image(1, Path::new("ghost.txt"))
            .await
            .unwrap();
        assert_eq!(image, ImageRef::Absent);
        assert_eq!(backend.resolve(&image).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_post_image_and_deletion() {
        let (_dir, backend) = setup();

        let stored = backend
            .write_post_image(2, Path::new("src/new.rs"), Some("fn main() {}\n"))
            .await
            .unwrap();
        assert_eq!(
            backend.resolve(&stored).await.unwrap().as_deref(),
            Some("fn main() {}\n")
        );

        let deleted = backend
            .write_post_image(2, Path::new("src/old.rs"), None)
            .await
            .unwrap();
        assert_eq!(deleted, ImageRef::Absent);
    }

    #[tokio::test]
    async fn test_prune_makes_payload_unresolvable() {
        let (dir, backend) = setup();
        std::fs::write(dir.path().join("a.txt"), "content").unwrap();

        let image = backend
            .capture_pre_image(3, Path::new("a.txt"))
            .await
            .unwrap();
        backend.prune(&[3]).await.unwrap();

        let result = backend.resolve(&image).await;
        assert!(matches!(result, Err(SnapshotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_traversal_locator_rejected() {
        let (_dir, backend) = setup();

        let hostile = ImageRef::Stored("../../etc/passwd".to_string());
        assert!(backend.resolve(&hostile).await.is_err());
    }
}
