//! Live pub/sub transport abstraction.
//!
//! The realtime channel carries codec-encoded updates between replicas with
//! no durability guarantees; durability always comes from storage and (when
//! configured) the sync backend, both of which run before publication.
//! Reconnect-and-rejoin semantics belong to the adapter; the runtime does not
//! track connection state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;
use crate::storage::BoxFuture;

/// Callback invoked with every payload received for a subscribed document.
pub type InboundHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Trait for live pub/sub transports.
///
/// Payloads are opaque bytes post-codec. Shared across documents; `publish`
/// calls for one document are serialized by the runtime.
pub trait RealtimeAdapter: Send + Sync {
    /// Start delivering inbound payloads for `id` to `on_update`.
    ///
    /// The returned subscription cancels delivery when dropped.
    fn subscribe(&self, id: &str, on_update: InboundHandler) -> Result<RealtimeSubscription>;

    /// Send one payload to every other subscriber of `id`.
    fn publish<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, Result<()>>;
}

/// Handle to an active realtime subscription; unsubscribes on drop.
pub struct RealtimeSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RealtimeSubscription {
    /// Wrap a cancellation closure.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for RealtimeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSubscription").finish_non_exhaustive()
    }
}

type SubscriberMap = Mutex<HashMap<String, Vec<(u64, InboundHandler)>>>;

/// In-process realtime hub.
///
/// Fans every published payload out to all subscribers of the same document
/// id, the publisher included; a publishing engine's replica already contains
/// the payload and applies it as a no-op. Useful for tests and for
/// single-process hosts running several engines against a shared bus; network
/// transports implement [`RealtimeAdapter`] themselves.
#[derive(Default)]
pub struct LocalRealtimeHub {
    subscribers: Arc<SubscriberMap>,
    next_token: AtomicU64,
}

impl LocalRealtimeHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn fan_out(subscribers: &SubscriberMap, id: &str, update: &[u8]) {
        let handlers: Vec<InboundHandler> = {
            let map = subscribers.lock().unwrap();
            map.get(id)
                .map(|subs| subs.iter().map(|(_, handler)| Arc::clone(handler)).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(update);
        }
    }
}

impl RealtimeAdapter for LocalRealtimeHub {
    fn subscribe(&self, id: &str, on_update: InboundHandler) -> Result<RealtimeSubscription> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.subscribers.lock().unwrap();
            map.entry(id.to_string())
                .or_default()
                .push((token, on_update));
        }

        let weak: Weak<SubscriberMap> = Arc::downgrade(&self.subscribers);
        let id = id.to_string();
        Ok(RealtimeSubscription::new(move || {
            if let Some(subscribers) = weak.upgrade() {
                let mut map = subscribers.lock().unwrap();
                if let Some(subs) = map.get_mut(&id) {
                    subs.retain(|(t, _)| *t != token);
                    if subs.is_empty() {
                        map.remove(&id);
                    }
                }
            }
        }))
    }

    fn publish<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // The hub cannot know which subscription the publisher holds, so
            // it delivers to everyone; engines already ignore payloads their
            // replica has seen.
            Self::fan_out(&self.subscribers, id, update);
            Ok(())
        })
    }
}

impl std::fmt::Debug for LocalRealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.subscribers.lock().unwrap();
        f.debug_struct("LocalRealtimeHub")
            .field("documents", &map.keys().collect::<Vec<_>>())
            .finish()
    }
}
