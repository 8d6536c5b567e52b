//! Request/response sync backend abstraction.
//!
//! The sync backend is an opaque byte log: it never merges CRDT state, it
//! only stores what clients push and hands back what other clients are
//! missing. The runtime drives it through two calls, [`pull`] and [`push`],
//! and layers all ordering guarantees (persistence before push, pull before
//! push, FIFO backlog) on its side.
//!
//! [`pull`]: SyncAdapter::pull
//! [`push`]: SyncAdapter::push

use crate::storage::BoxFuture;

use crate::error::Result;

/// A pull request against the sync backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    /// Document to pull.
    pub doc_id: String,

    /// The replica's encoded state vector; `None` on a brand-new document's
    /// first pull.
    pub state_vector: Option<Vec<u8>>,

    /// Ask the server for a full snapshot instead of incremental updates.
    pub request_snapshot: bool,
}

/// A push request against the sync backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Document to push.
    pub doc_id: String,

    /// Codec-encoded payload.
    pub update: Vec<u8>,

    /// Whether the payload is a full-state snapshot, for backends that store
    /// snapshots separately from the incremental log.
    pub is_snapshot: bool,
}

/// Trait for request/response sync transports.
///
/// Shared across documents; the runtime serializes calls per document but may
/// issue calls for different documents concurrently. Payloads are opaque
/// bytes post-codec.
pub trait SyncAdapter: Send + Sync {
    /// Fetch updates the replica is missing.
    ///
    /// Returns a single opaque blob (a snapshot or a merged update), or
    /// `None` when the replica is up to date.
    fn pull<'a>(&'a self, request: PullRequest) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    /// Send one payload to the backend.
    fn push<'a>(&'a self, request: PushRequest) -> BoxFuture<'a, Result<()>>;
}
