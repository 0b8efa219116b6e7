//! Durable storage for batch payloads.
//!
//! Two interchangeable backends sit behind one capability set: the
//! copy backend keeps physical file copies in a batch-scoped
//! directory, the reference-log backend appends blobs to the
//! repository's git object database. The snapshot manager never knows
//! which one it is talking to.

mod copy;
mod git_ref;

pub use copy::CopyBackend;
pub use git_ref::RefLogBackend;

use crate::{ImageRef, SnapshotResult};
use async_trait::async_trait;
use std::path::Path;

/// Capability set every storage backend provides.
///
/// Paths are relative to the repository root. Per-file calls within a
/// batch may arrive concurrently; implementations serialize internally
/// where their medium requires it.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Capture the current on-disk content of `path` as the pre-image
    /// for the given batch. A missing file yields [`ImageRef::Absent`].
    async fn capture_pre_image(&self, batch_id: u64, path: &Path) -> SnapshotResult<ImageRef>;

    /// Record the content a batch wrote for `path`. `None` records a
    /// deletion and yields [`ImageRef::Absent`].
    async fn write_post_image(
        &self,
        batch_id: u64,
        path: &Path,
        content: Option<&str>,
    ) -> SnapshotResult<ImageRef>;

    /// Read back the content an image reference points at. `Absent`
    /// resolves to `None`.
    async fn resolve(&self, image: &ImageRef) -> SnapshotResult<Option<String>>;

    /// Delete the payloads of the given batches. The metadata records
    /// are the manager's business; only stored content goes away.
    async fn prune(&self, batch_ids: &[u64]) -> SnapshotResult<()>;
}
