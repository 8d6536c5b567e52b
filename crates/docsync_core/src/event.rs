//! Observable sync-phase events.
//!
//! The engine emits a [`SyncEvent`] around every pull and push so UIs and
//! telemetry can show progress without hooking into the sync internals.
//! Listeners are registered per engine and unsubscribe when the returned
//! [`EventSubscription`] is dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::error::{DocsyncError, ErrorHook};

/// Which half of the protocol an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Fetching remote updates.
    Pull,
    /// Sending a local update or snapshot.
    Push,
}

/// Lifecycle phase of a pull or push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// The operation is about to hit the transport.
    Start,
    /// The operation completed.
    Success,
    /// The operation failed; see [`SyncEvent::error`].
    Error,
}

/// A single observable sync-phase event.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    /// Document the operation belongs to.
    pub doc_id: String,

    /// Pull or push.
    pub direction: SyncDirection,

    /// Start, success or error.
    pub phase: SyncPhase,

    /// For pushes: whether the payload is a full-state snapshot.
    pub is_snapshot: bool,

    /// For pulls: whether a snapshot was requested from the server.
    pub request_snapshot: bool,

    /// Payload size, where one is known (pushed bytes, received bytes).
    pub bytes: Option<usize>,

    /// Error message for `SyncPhase::Error` events.
    pub error: Option<String>,

    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl SyncEvent {
    pub(crate) fn new(doc_id: &str, direction: SyncDirection, phase: SyncPhase) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            direction,
            phase,
            is_snapshot: false,
            request_snapshot: false,
            bytes: None,
            error: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub(crate) fn with_snapshot(mut self, is_snapshot: bool) -> Self {
        self.is_snapshot = is_snapshot;
        self
    }

    pub(crate) fn with_request_snapshot(mut self, request_snapshot: bool) -> Self {
        self.request_snapshot = request_snapshot;
        self
    }

    pub(crate) fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub(crate) fn with_error(mut self, err: &DocsyncError) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

/// Listener callback for sync events.
pub type SyncEventListener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

type ListenerSlot = (u64, SyncEventListener);

/// Registry of sync-event listeners for one engine.
///
/// Emission is synchronous and in registration order. A panicking listener is
/// caught and routed to the error hook; it never poisons the emitting task.
#[derive(Default, Clone)]
pub(crate) struct EventBus {
    listeners: Arc<RwLock<Vec<ListenerSlot>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Dropping the returned subscription unregisters it.
    pub(crate) fn subscribe(&self, listener: SyncEventListener) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().unwrap().push((id, listener));
        EventSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Emit an event to every registered listener.
    pub(crate) fn emit(&self, event: &SyncEvent, on_error: &ErrorHook) {
        let listeners = self.listeners.read().unwrap().clone();
        for (_, listener) in &listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(event)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "listener panicked".to_string());
                on_error(&DocsyncError::Listener(message));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().unwrap().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().unwrap().len())
            .finish()
    }
}

/// Handle to a registered sync-event listener; unsubscribes on drop.
pub struct EventSubscription {
    id: u64,
    listeners: Weak<RwLock<Vec<ListenerSlot>>>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .finish()
    }
}
