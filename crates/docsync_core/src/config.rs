//! Policy knobs for sync and snapshot behavior.
//!
//! All policies are plain serde-able structs with sensible defaults, so hosts
//! can deserialize them straight out of their own configuration files.

use serde::{Deserialize, Serialize};

/// Snapshot cadence: when to compact the full CRDT state into a stored
/// snapshot record.
///
/// Snapshots are bootstrap hints, not replacements: the update log is never
/// truncated when one is taken. A threshold of `None` disables that trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    /// Take a snapshot after this many persisted updates.
    pub updates: Option<u64>,

    /// Take a snapshot after this many persisted update bytes.
    pub bytes: Option<u64>,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            updates: Some(100),
            bytes: None,
        }
    }
}

impl SnapshotPolicy {
    /// Whether the accumulated counters meet either threshold.
    pub fn is_due(&self, updates_since: u64, bytes_since: u64) -> bool {
        let by_updates = self.updates.is_some_and(|n| updates_since >= n);
        let by_bytes = self.bytes.is_some_and(|n| bytes_since >= n);
        by_updates || by_bytes
    }
}

/// How snapshots participate in the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSyncPolicy {
    /// Send a snapshot push whenever the local snapshot generation is ahead
    /// of the last synced one. When false, only the very first snapshot is
    /// sent; later generation bumps are suppressed.
    pub send: bool,

    /// Ask the server for a snapshot on a brand-new document's first pull.
    /// When false, brand-new documents pull incrementally with their (empty)
    /// state vector instead.
    pub request_on_new_document: bool,
}

impl Default for SnapshotSyncPolicy {
    fn default() -> Self {
        Self {
            send: true,
            request_on_new_document: true,
        }
    }
}

/// Top-level sync policy for an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Pull with the current state vector before every push cycle.
    pub pull_before_push: bool,

    /// Snapshot participation in sync.
    pub snapshot_sync: SnapshotSyncPolicy,

    /// Local snapshot cadence.
    pub snapshot_every: SnapshotPolicy,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            pull_before_push: true,
            snapshot_sync: SnapshotSyncPolicy::default(),
            snapshot_every: SnapshotPolicy::default(),
        }
    }
}

/// Options for a manual sync request (`sync_now`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Run a state-vector pull.
    pub pull: bool,

    /// Run the snapshot handshake and drain the pending-sync backlog.
    pub push: bool,

    /// Store a fresh local snapshot before pushing.
    pub force_snapshot: bool,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            pull: true,
            push: true,
            force_snapshot: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_policy_default() {
        let policy = SnapshotPolicy::default();
        assert_eq!(policy.updates, Some(100));
        assert_eq!(policy.bytes, None);
    }

    #[test]
    fn test_snapshot_policy_is_due() {
        let policy = SnapshotPolicy {
            updates: Some(2),
            bytes: Some(1024),
        };
        assert!(!policy.is_due(1, 10));
        assert!(policy.is_due(2, 10));
        assert!(policy.is_due(0, 2048));

        let disabled = SnapshotPolicy {
            updates: None,
            bytes: None,
        };
        assert!(!disabled.is_due(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_sync_policy_defaults() {
        let policy = SyncPolicy::default();
        assert!(policy.pull_before_push);
        assert!(policy.snapshot_sync.send);
        assert!(policy.snapshot_sync.request_on_new_document);
    }

    #[test]
    fn test_sync_request_default() {
        let req = SyncRequest::default();
        assert!(req.pull);
        assert!(req.push);
        assert!(!req.force_snapshot);
    }

    #[test]
    fn test_policy_roundtrips_through_json() {
        let policy = SyncPolicy {
            pull_before_push: false,
            snapshot_sync: SnapshotSyncPolicy {
                send: false,
                request_on_new_document: true,
            },
            snapshot_every: SnapshotPolicy {
                updates: Some(1),
                bytes: None,
            },
        };
        let json = serde_json::to_string(&policy).unwrap();
        let back: SyncPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
