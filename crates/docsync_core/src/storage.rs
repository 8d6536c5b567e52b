//! Storage abstraction for document persistence.
//!
//! This module defines the [`StorageAdapter`] trait which abstracts over
//! durable backends (key-value stores, SQL, browser storage) for the three
//! records the runtime keeps per document:
//!
//! 1. **Snapshot record**: compacted full state plus snapshot generations
//! 2. **Update log**: ordered incremental updates since inception
//! 3. **Pending-sync list**: locally authored updates not yet acknowledged
//!    by a successful push
//!
//! Only the update log and removal are required. Every other capability is
//! optional: getters default to "no record", setters default to
//! [`DocsyncError::StorageUnsupported`], which the runtime downgrades to a
//! single warning per method and in-memory-only behavior for that feature.
//!
//! ## Object safety
//!
//! `StorageAdapter` is designed to be object-safe so it can be shared as
//! `Arc<dyn StorageAdapter>` across documents. To enable this, all methods
//! return boxed futures.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::{DocsyncError, Result};

/// A boxed future for object-safe async adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The stored snapshot record for a document.
///
/// `snapshot` may be absent while the generations are still meaningful
/// (e.g. a backend that persisted generations but dropped the blob).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// Compacted full-state blob, already codec-encoded.
    pub snapshot: Option<Vec<u8>>,

    /// Number of snapshots ever stored for this document.
    pub snapshot_generation: u64,

    /// Last snapshot generation acknowledged by a sync push.
    /// Invariant: `synced_snapshot_generation <= snapshot_generation`.
    pub synced_snapshot_generation: u64,
}

/// Trait for document storage backends.
///
/// All byte buffers returned by an adapter must be independently owned by the
/// caller; adapters clone on read. The runtime issues at most one storage
/// call per document at a time, but the adapter may be shared across
/// documents and must tolerate concurrent calls for different ids.
pub trait StorageAdapter: Send + Sync {
    /// Load the snapshot record, or `None` when the document has none.
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<SnapshotRecord>>> {
        let _ = id;
        Box::pin(async { Ok(None) })
    }

    /// Load the ordered update log.
    ///
    /// `None` means the document is unknown; an empty vec means the document
    /// is known with an empty log. The distinction feeds brand-new detection.
    fn get_updates<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Vec<Vec<u8>>>>>;

    /// Load the pending-sync list, or `None` when the document has none.
    fn get_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Vec<Vec<u8>>>>> {
        let _ = id;
        Box::pin(async { Ok(None) })
    }

    /// Append one update to the ordered log.
    fn append_update<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Store the latest snapshot blob and bump the stored
    /// `snapshot_generation`.
    fn set_snapshot<'a>(&'a self, id: &'a str, snapshot: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let _ = (id, snapshot);
        Box::pin(async {
            Err(DocsyncError::StorageUnsupported {
                method: "set_snapshot",
            })
        })
    }

    /// Replace the pending-sync list.
    fn mark_pending_sync<'a>(
        &'a self,
        id: &'a str,
        updates: &'a [Vec<u8>],
    ) -> BoxFuture<'a, Result<()>> {
        let _ = (id, updates);
        Box::pin(async {
            Err(DocsyncError::StorageUnsupported {
                method: "mark_pending_sync",
            })
        })
    }

    /// Clear the pending-sync list. Equivalent to `mark_pending_sync(id, [])`.
    fn clear_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        self.mark_pending_sync(id, &[])
    }

    /// Advance the stored `synced_snapshot_generation`.
    ///
    /// Monotone-max, capped at the stored `snapshot_generation`.
    fn mark_snapshot_synced<'a>(
        &'a self,
        id: &'a str,
        generation: u64,
    ) -> BoxFuture<'a, Result<()>> {
        let _ = (id, generation);
        Box::pin(async {
            Err(DocsyncError::StorageUnsupported {
                method: "mark_snapshot_synced",
            })
        })
    }

    /// Delete every record for the document.
    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Tracks which optional storage methods have already produced a warning, so
/// each missing capability is logged exactly once per engine.
#[derive(Debug, Default)]
pub(crate) struct CapabilityWarnings {
    warned: Mutex<HashSet<&'static str>>,
}

impl CapabilityWarnings {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run an optional-capability result. `StorageUnsupported` is downgraded
    /// to a warn-once and reported as `Ok(false)`; other errors pass through.
    pub(crate) fn check(&self, result: Result<()>) -> Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(DocsyncError::StorageUnsupported { method }) => {
                let mut warned = self.warned.lock().unwrap();
                if warned.insert(method) {
                    log::warn!(
                        "storage adapter does not implement '{}'; continuing in-memory only",
                        method
                    );
                }
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }
}
