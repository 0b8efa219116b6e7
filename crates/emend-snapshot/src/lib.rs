//! Batch snapshot engine for emend.
//!
//! This crate records every batch of file writes with durable
//! before/after images so changes can be diffed and reverted:
//! - Batches move `Pending → Captured → Committed`, with `Failed`
//!   reachable from `Captured` and automatic rollback on partial
//!   failure
//! - History is a strictly linear, append-only sequence; a restore is
//!   a new batch carrying a back-reference, never an edit to the past
//! - Payloads live behind a storage capability set with two
//!   interchangeable backends: file copies, or the repository's git
//!   object database
//!
//! # Example
//!
//! ```no_run
//! use emend_snapshot::{EngineConfig, SnapshotManager};
//! use std::collections::HashMap;
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::load(std::path::Path::new("/project")).await?;
//! let manager = SnapshotManager::open("/project", &config).await?;
//!
//! let inflight = manager
//!     .begin_batch(&[PathBuf::from("src/main.rs")], "apply edits")
//!     .await?;
//!
//! let mut contents = HashMap::new();
//! contents.insert(PathBuf::from("src/main.rs"), Some("fn main() {}\n".to_string()));
//! let batch = manager.commit_batch(inflight, contents).await?;
//!
//! // ... later ...
//! manager.restore(batch.id, None).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod batch;
mod config;
mod error;
mod index;
mod lock;
mod manager;

pub use backend::{CopyBackend, RefLogBackend, StorageBackend};
pub use batch::{Batch, BatchStatus, FileRecord, ImageRef};
pub use config::{BackendKind, EngineConfig};
pub use error::{SnapshotError, SnapshotResult};
pub use index::HistoryIndex;
pub use lock::{SessionGuard, SessionLock};
pub use manager::{InFlightBatch, SnapshotManager};
