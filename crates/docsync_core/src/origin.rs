//! Update origin classification.
//!
//! Every CRDT transaction carries an [`yrs::Origin`] tag. The runtime owns
//! three private tags (storage, sync, realtime) and classifies every update
//! emitted by the document against them. Anything else (including a
//! caller-supplied origin on `mutate_with_origin`, or no origin at all) counts
//! as local authorship and flows into persistence, push and publish.
//!
//! Classification is by tag comparison only; the runtime never inspects
//! update bytes to decide where they came from.

use yrs::Origin;

/// The `docsync.` prefix is reserved for the runtime's own tags; hosts must
/// not use it for their mutation origins.
const STORAGE_TAG: &str = "docsync.origin.storage";
const SYNC_TAG: &str = "docsync.origin.sync";
const REALTIME_TAG: &str = "docsync.origin.realtime";
const LOCAL_TAG: &str = "docsync.origin.local";

/// Channel that produced an applied update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Locally authored (a `mutate` call, or any unrecognized origin).
    Local,

    /// Applied during hydration from the persistent log or snapshot.
    Storage,

    /// Applied from a pull or push acknowledgement.
    Sync,

    /// Applied from the live subscription.
    Realtime,
}

impl std::fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOrigin::Local => write!(f, "local"),
            UpdateOrigin::Storage => write!(f, "storage"),
            UpdateOrigin::Sync => write!(f, "sync"),
            UpdateOrigin::Realtime => write!(f, "realtime"),
        }
    }
}

/// Tag for transactions that replay persisted state during hydration.
pub(crate) fn storage_origin() -> Origin {
    Origin::from(STORAGE_TAG)
}

/// Tag for transactions applying bytes received from the sync backend.
pub(crate) fn sync_origin() -> Origin {
    Origin::from(SYNC_TAG)
}

/// Tag for transactions applying bytes received over the live subscription.
pub(crate) fn realtime_origin() -> Origin {
    Origin::from(REALTIME_TAG)
}

/// Default tag for local mutations when the caller supplies none.
pub(crate) fn local_origin() -> Origin {
    Origin::from(LOCAL_TAG)
}

/// Classify a transaction origin against the runtime's private tags.
pub(crate) fn classify(origin: Option<&Origin>) -> UpdateOrigin {
    match origin {
        Some(o) if *o == storage_origin() => UpdateOrigin::Storage,
        Some(o) if *o == sync_origin() => UpdateOrigin::Sync,
        Some(o) if *o == realtime_origin() => UpdateOrigin::Realtime,
        _ => UpdateOrigin::Local,
    }
}
