use std::sync::Arc;

use thiserror::Error;

/// Unified error type for docsync operations.
///
/// Several variants carry a plain message because the adapter traits in
/// `storage`, `sync_adapter` and `realtime` are object-safe and cannot
/// surface backend-specific error types.
#[derive(Debug, Error)]
pub enum DocsyncError {
    /// General error for any kind of I/O issue not otherwise documented here.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persistence call failed.
    ///
    /// Fatal for the operation that issued it: the enqueued task rejects and
    /// the pending-sync backlog is not advanced.
    #[error("storage error: {0}")]
    Storage(String),

    /// The storage adapter does not implement an optional capability.
    ///
    /// The runtime downgrades this to a single warning per method and
    /// continues with in-memory-only behavior for that feature.
    #[error("storage adapter does not implement '{method}'")]
    StorageUnsupported {
        /// Name of the missing optional method
        method: &'static str,
    },

    /// A pull or push against the sync backend failed.
    ///
    /// The affected backlog entry stays at the head of the pending-sync queue
    /// and is retried on the next push cycle.
    #[error("sync transport error: {0}")]
    SyncTransport(String),

    /// A realtime publish failed.
    ///
    /// Non-fatal: the update is already durable by the time publication is
    /// attempted.
    #[error("realtime publish error: {0}")]
    RealtimePublish(String),

    /// A codec transform or a malformed server payload could not be decoded.
    ///
    /// The inbound update is discarded; local state is untouched.
    #[error("decode error: {0}")]
    Decode(String),

    /// An error from the underlying CRDT (update decode/apply, state vectors).
    #[error("CRDT error: {0}")]
    Crdt(String),

    /// A sync-event listener panicked while handling an event.
    ///
    /// Routed to the error hook; never propagated past the listener.
    #[error("event listener error: {0}")]
    Listener(String),

    /// An operation referenced a document id that is not open.
    #[error("document '{0}' is not loaded")]
    NotLoaded(String),

    /// `open` was called with a model type that differs from the one the
    /// document is already open with.
    #[error("document '{0}' is already open with a different model type")]
    ModelMismatch(String),

    /// The per-document task queue shut down before the task completed.
    ///
    /// Happens when a document is closed or removed while work is queued;
    /// the results of in-flight tasks are discarded.
    #[error("document task was cancelled")]
    TaskCancelled,

    /// JSON (de)serialization error from the wire DTOs.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for docsync operations.
pub type Result<T> = std::result::Result<T, DocsyncError>;

/// Hook invoked for every non-fatal background error (failed realtime
/// publishes, listener panics, backlog push failures observed by nobody).
pub type ErrorHook = Arc<dyn Fn(&DocsyncError) + Send + Sync>;

/// The default error hook logs through the `log` facade.
pub(crate) fn default_error_hook() -> ErrorHook {
    Arc::new(|err| log::error!("background error: {}", err))
}
