//! In-memory storage implementation for testing and ephemeral hosts.
//!
//! This provides a complete implementation of [`StorageAdapter`] backed by
//! `HashMap`s, for use in unit tests, development, and hosts that persist
//! elsewhere (e.g. WASM environments that flush to browser storage on their
//! own schedule).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::storage::{BoxFuture, SnapshotRecord, StorageAdapter};

/// In-memory document storage.
///
/// Thread-safe via `RwLock`; data is lost when dropped. Implements every
/// optional capability, including the monotone-max-capped
/// `mark_snapshot_synced`, so it doubles as the reference behavior for
/// backend authors.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<String, DocRecord>>,
}

#[derive(Debug, Default, Clone)]
struct DocRecord {
    snapshot: Option<Vec<u8>>,
    snapshot_generation: u64,
    synced_snapshot_generation: u64,
    updates: Vec<Vec<u8>>,
    pending_sync: Vec<Vec<u8>>,
    /// Set once any record exists, so a known-empty doc is distinguishable
    /// from an unknown one.
    known: bool,
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates in the log for a document (test helper).
    pub fn update_count(&self, id: &str) -> usize {
        let records = self.records.read().unwrap();
        records.get(id).map(|r| r.updates.len()).unwrap_or(0)
    }

    /// Current pending-sync list for a document (test helper).
    pub fn pending_list(&self, id: &str) -> Vec<Vec<u8>> {
        let records = self.records.read().unwrap();
        records
            .get(id)
            .map(|r| r.pending_sync.clone())
            .unwrap_or_default()
    }

    /// Stored snapshot generation for a document (test helper).
    pub fn snapshot_generation(&self, id: &str) -> u64 {
        let records = self.records.read().unwrap();
        records.get(id).map(|r| r.snapshot_generation).unwrap_or(0)
    }
}

impl StorageAdapter for MemoryStorage {
    fn get_snapshot<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<SnapshotRecord>>> {
        Box::pin(async move {
            let records = self.records.read().unwrap();
            Ok(records.get(id).filter(|r| r.known).map(|r| SnapshotRecord {
                snapshot: r.snapshot.clone(),
                snapshot_generation: r.snapshot_generation,
                synced_snapshot_generation: r.synced_snapshot_generation,
            }))
        })
    }

    fn get_updates<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Vec<Vec<u8>>>>> {
        Box::pin(async move {
            let records = self.records.read().unwrap();
            Ok(records.get(id).filter(|r| r.known).map(|r| r.updates.clone()))
        })
    }

    fn get_pending_sync<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Vec<Vec<u8>>>>> {
        Box::pin(async move {
            let records = self.records.read().unwrap();
            Ok(records
                .get(id)
                .filter(|r| r.known)
                .map(|r| r.pending_sync.clone()))
        })
    }

    fn append_update<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            let record = records.entry(id.to_string()).or_default();
            record.known = true;
            record.updates.push(update.to_vec());
            Ok(())
        })
    }

    fn set_snapshot<'a>(&'a self, id: &'a str, snapshot: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            let record = records.entry(id.to_string()).or_default();
            record.known = true;
            record.snapshot = Some(snapshot.to_vec());
            record.snapshot_generation += 1;
            Ok(())
        })
    }

    fn mark_pending_sync<'a>(
        &'a self,
        id: &'a str,
        updates: &'a [Vec<u8>],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            let record = records.entry(id.to_string()).or_default();
            record.known = true;
            record.pending_sync = updates.to_vec();
            Ok(())
        })
    }

    fn mark_snapshot_synced<'a>(
        &'a self,
        id: &'a str,
        generation: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            let record = records.entry(id.to_string()).or_default();
            record.known = true;
            // Monotone-max, capped at the stored generation.
            let capped = generation.min(record.snapshot_generation);
            record.synced_snapshot_generation = record.synced_snapshot_generation.max(capped);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut records = self.records.write().unwrap();
            records.remove(id);
            Ok(())
        })
    }
}
