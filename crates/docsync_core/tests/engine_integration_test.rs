//! End-to-end tests for the document engine: backlog drain, echo
//! suppression, snapshot-sync policies, manual sync and cross-replica
//! round-trips, all against recording mock adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use docsync_core::{
    BoxFuture, DocEngine, DocsyncError, InboundHandler, LocalRealtimeHub, MapModel, MemoryStorage,
    PullRequest, PushRequest, RealtimeAdapter, RealtimeSubscription, Result, SnapshotPolicy,
    SnapshotSyncPolicy, StorageAdapter, SyncAdapter, SyncPolicy, SyncRequest,
};

/// Mock sync backend recording every pull and push (simulates the server).
#[derive(Default)]
struct MockSyncBackend {
    pulls: Mutex<Vec<PullRequest>>,
    pushes: Mutex<Vec<PushRequest>>,
    /// Payload handed out on the next pull, then cleared.
    pull_payload: Mutex<Option<Vec<u8>>>,
    /// While set, pushes fail with a transport error and are not recorded.
    fail_pushes: AtomicBool,
}

impl MockSyncBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn pulls(&self) -> Vec<PullRequest> {
        self.pulls.lock().unwrap().clone()
    }

    fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().unwrap().clone()
    }

    fn set_pull_payload(&self, payload: Vec<u8>) {
        *self.pull_payload.lock().unwrap() = Some(payload);
    }

    fn set_offline(&self, offline: bool) {
        self.fail_pushes.store(offline, Ordering::SeqCst);
    }
}

impl SyncAdapter for MockSyncBackend {
    fn pull<'a>(&'a self, request: PullRequest) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            self.pulls.lock().unwrap().push(request);
            Ok(self.pull_payload.lock().unwrap().take())
        })
    }

    fn push<'a>(&'a self, request: PushRequest) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.fail_pushes.load(Ordering::SeqCst) {
                return Err(DocsyncError::SyncTransport("backend offline".into()));
            }
            self.pushes.lock().unwrap().push(request);
            Ok(())
        })
    }
}

/// Mock realtime transport: records publishes, lets tests inject inbound
/// payloads through the subscribed handler.
#[derive(Default)]
struct MockRealtime {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    handlers: Mutex<HashMap<String, InboundHandler>>,
}

impl MockRealtime {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    fn deliver(&self, id: &str, payload: &[u8]) {
        let handler = self.handlers.lock().unwrap().get(id).cloned();
        let handler = handler.expect("no subscriber for document");
        handler(payload);
    }
}

impl RealtimeAdapter for MockRealtime {
    fn subscribe(&self, id: &str, on_update: InboundHandler) -> Result<RealtimeSubscription> {
        self.handlers
            .lock()
            .unwrap()
            .insert(id.to_string(), on_update);
        Ok(RealtimeSubscription::new(|| {}))
    }

    fn publish<'a>(&'a self, id: &'a str, update: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.published
                .lock()
                .unwrap()
                .push((id.to_string(), update.to_vec()));
            Ok(())
        })
    }
}

/// Encode the full state of a scratch replica with `count = value`.
fn update_setting_count(value: i64) -> Vec<u8> {
    use docsync_core::DocModel;
    use yrs::{Doc, ReadTxn, StateVector, Transact};

    let doc = Doc::new();
    let model = MapModel::attach(&doc);
    {
        let mut txn = doc.transact_mut();
        model.set(&mut txn, "count", value);
    }
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}

// =========================================================================
// Spec scenarios
// =========================================================================

#[tokio::test]
async fn test_offline_then_online_backlog_drain() {
    let storage = Arc::new(MemoryStorage::new());

    // Session 1: no sync backend configured.
    {
        let engine = DocEngine::new(Arc::clone(&storage) as Arc<dyn StorageAdapter>);
        let doc = engine.open::<MapModel>("d1").await.unwrap();
        doc.mutate(|data, txn| data.set(txn, "count", 3i64));
        doc.flush().await.unwrap();
        assert_eq!(storage.pending_list("d1").len(), 1);
        engine.close("d1").unwrap();
    }

    // Session 2: reopen with a sync backend; the backlog drains.
    let backend = MockSyncBackend::new();
    let engine = DocEngine::builder(Arc::clone(&storage) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();
    doc.flush().await.unwrap();

    let pushes = backend.pushes();
    assert_eq!(pushes.len(), 2);
    assert!(pushes[0].is_snapshot);
    assert!(!pushes[1].is_snapshot);
    assert!(storage.pending_list("d1").is_empty());
    assert_eq!(doc.status().pending_sync_len, 0);
}

#[tokio::test]
async fn test_echo_suppression_for_realtime_updates() {
    let storage = Arc::new(MemoryStorage::new());
    let realtime = MockRealtime::new();
    let engine = DocEngine::builder(Arc::clone(&storage) as Arc<dyn StorageAdapter>)
        .realtime_adapter(Arc::clone(&realtime) as Arc<dyn RealtimeAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    realtime.deliver("d1", &update_setting_count(9));
    doc.flush().await.unwrap();

    // Model view reflects the inbound update.
    let count = doc.with_read(|data, txn| data.get_i64(txn, "count"));
    assert_eq!(count, Some(9));

    // Persisted, but never echoed back or marked pending.
    assert_eq!(storage.update_count("d1"), 1);
    assert!(realtime.published().is_empty());
    assert!(storage.pending_list("d1").is_empty());
    assert_eq!(doc.status().pending_sync_len, 0);
}

#[tokio::test]
async fn test_snapshot_sync_single_send() {
    let backend = MockSyncBackend::new();
    let policy = SyncPolicy {
        snapshot_sync: SnapshotSyncPolicy {
            send: false,
            request_on_new_document: true,
        },
        snapshot_every: SnapshotPolicy {
            updates: Some(1),
            bytes: None,
        },
        ..SyncPolicy::default()
    };
    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .policy(policy)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    doc.mutate(|data, txn| data.set(txn, "a", 1i64));
    doc.flush().await.unwrap();
    doc.mutate(|data, txn| data.set(txn, "b", 2i64));
    doc.flush().await.unwrap();

    // First snapshot is always sent; the second generation bump is not.
    let pushes = backend.pushes();
    assert_eq!(pushes.len(), 3);
    assert!(pushes[0].is_snapshot);
    assert!(!pushes[1].is_snapshot);
    assert!(!pushes[2].is_snapshot);
}

#[tokio::test]
async fn test_cold_start_snapshot_request_disabled() {
    let backend = MockSyncBackend::new();
    let policy = SyncPolicy {
        snapshot_sync: SnapshotSyncPolicy {
            send: true,
            request_on_new_document: false,
        },
        ..SyncPolicy::default()
    };
    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .policy(policy)
        .build();
    let _doc = engine.open::<MapModel>("d1").await.unwrap();

    let pulls = backend.pulls();
    assert_eq!(pulls.len(), 1);
    assert!(pulls[0].state_vector.is_some());
    assert!(!pulls[0].request_snapshot);
}

#[tokio::test]
async fn test_pull_before_push_disabled() {
    let backend = MockSyncBackend::new();
    let policy = SyncPolicy {
        pull_before_push: false,
        ..SyncPolicy::default()
    };
    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .policy(policy)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    doc.mutate(|data, txn| data.set(txn, "count", 1i64));
    doc.flush().await.unwrap();

    // Only the initial pull; the push still happened.
    assert_eq!(backend.pulls().len(), 1);
    let pushes = backend.pushes();
    assert!(pushes.iter().any(|p| !p.is_snapshot));
    assert_eq!(doc.status().pending_sync_len, 0);
}

#[tokio::test]
async fn test_manual_sync_push_with_force_snapshot() {
    let backend = MockSyncBackend::new();
    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    // Mutate while the backend is unreachable: the update stays pending.
    backend.set_offline(true);
    doc.mutate(|data, txn| data.set(txn, "count", 1i64));
    doc.flush().await.unwrap();
    assert_eq!(doc.status().pending_sync_len, 1);
    assert!(backend.pushes().is_empty());
    let generation_before = doc.status().snapshot_generation;

    backend.set_offline(false);
    doc.sync(SyncRequest {
        pull: false,
        push: true,
        force_snapshot: true,
    })
    .await
    .unwrap();

    // Fresh snapshot stored, then snapshot push, then the pending push.
    assert_eq!(doc.status().snapshot_generation, generation_before + 1);
    let pushes = backend.pushes();
    assert_eq!(pushes.len(), 2);
    assert!(pushes[0].is_snapshot);
    assert!(!pushes[1].is_snapshot);
    assert_eq!(doc.status().pending_sync_len, 0);
}

// =========================================================================
// Quantified properties
// =========================================================================

#[tokio::test]
async fn test_local_updates_keep_fifo_order_everywhere() {
    let storage = Arc::new(MemoryStorage::new());
    let backend = MockSyncBackend::new();
    let engine = DocEngine::builder(Arc::clone(&storage) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    backend.set_offline(true);
    for i in 0..3i64 {
        doc.mutate(|data, txn| data.set(txn, "count", i));
    }
    doc.flush().await.unwrap();

    // Same order in the update log and in pending-sync.
    let log = storage.get_updates("d1").await.unwrap().unwrap();
    let pending = storage.pending_list("d1");
    assert_eq!(pending.len(), 3);
    assert_eq!(log, pending);

    // Same order in the sequence of pushes once the backend is back.
    backend.set_offline(false);
    doc.sync(SyncRequest {
        pull: false,
        push: true,
        force_snapshot: false,
    })
    .await
    .unwrap();

    let pushed: Vec<Vec<u8>> = backend
        .pushes()
        .into_iter()
        .filter(|p| !p.is_snapshot)
        .map(|p| p.update)
        .collect();
    assert_eq!(pushed, pending);
    assert!(storage.pending_list("d1").is_empty());
}

#[tokio::test]
async fn test_pulled_updates_are_never_pushed_or_published() {
    let backend = MockSyncBackend::new();
    let realtime = MockRealtime::new();
    backend.set_pull_payload(update_setting_count(5));

    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .realtime_adapter(Arc::clone(&realtime) as Arc<dyn RealtimeAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();
    doc.flush().await.unwrap();

    let count = doc.with_read(|data, txn| data.get_i64(txn, "count"));
    assert_eq!(count, Some(5));
    assert!(backend.pushes().is_empty());
    assert!(realtime.published().is_empty());
    assert_eq!(doc.status().pending_sync_len, 0);
}

#[tokio::test]
async fn test_initial_pull_with_payload_snapshots_and_marks_synced() {
    let storage = Arc::new(MemoryStorage::new());
    let backend = MockSyncBackend::new();
    backend.set_pull_payload(update_setting_count(5));

    let engine = DocEngine::builder(Arc::clone(&storage) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    let status = doc.status();
    assert!(!status.is_brand_new);
    assert_eq!(status.snapshot_generation, 1);
    assert_eq!(status.synced_snapshot_generation, 1);
    assert_eq!(storage.snapshot_generation("d1"), 1);
}

#[tokio::test]
async fn test_brand_new_pull_then_incremental_pulls() {
    let backend = MockSyncBackend::new();
    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    doc.mutate(|data, txn| data.set(txn, "count", 1i64));
    doc.flush().await.unwrap();

    let pulls = backend.pulls();
    assert!(pulls.len() >= 2);
    // First pull: no state vector, snapshot requested.
    assert!(pulls[0].state_vector.is_none());
    assert!(pulls[0].request_snapshot);
    // Every later pull carries a state vector and no snapshot request.
    for pull in &pulls[1..] {
        assert!(pull.state_vector.is_some());
        assert!(!pull.request_snapshot);
    }
}

#[tokio::test]
async fn test_synced_generation_never_exceeds_snapshot_generation() {
    let backend = MockSyncBackend::new();
    let engine = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    let check = |label: &str| {
        let status = doc.status();
        assert!(
            status.synced_snapshot_generation <= status.snapshot_generation,
            "invariant violated {}: {:?}",
            label,
            status
        );
    };

    check("after open");
    doc.mutate(|data, txn| data.set(txn, "count", 1i64));
    check("after mutate");
    doc.flush().await.unwrap();
    check("after flush");
    doc.sync(SyncRequest::default()).await.unwrap();
    check("after manual sync");
}

#[tokio::test]
async fn test_failed_push_keeps_backlog_head_for_retry() {
    let storage = Arc::new(MemoryStorage::new());
    let backend = MockSyncBackend::new();
    let engine = DocEngine::builder(Arc::clone(&storage) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend) as Arc<dyn SyncAdapter>)
        .build();
    let doc = engine.open::<MapModel>("d1").await.unwrap();

    backend.set_offline(true);
    doc.mutate(|data, txn| data.set(txn, "count", 1i64));
    doc.flush().await.unwrap();
    assert_eq!(doc.status().pending_sync_len, 1);

    // The next local mutation retries the backlog head first.
    backend.set_offline(false);
    doc.mutate(|data, txn| data.set(txn, "count", 2i64));
    doc.flush().await.unwrap();

    let incremental: Vec<PushRequest> = backend
        .pushes()
        .into_iter()
        .filter(|p| !p.is_snapshot)
        .collect();
    assert_eq!(incremental.len(), 1);
    assert_eq!(doc.status().pending_sync_len, 1);

    // A manual sync drains the remainder.
    doc.sync(SyncRequest::default()).await.unwrap();
    assert_eq!(doc.status().pending_sync_len, 0);
}

// =========================================================================
// Cross-replica round-trips
// =========================================================================

#[tokio::test]
async fn test_round_trip_through_the_sync_backend() {
    // Replica A authors a change and pushes it.
    let backend_a = MockSyncBackend::new();
    let engine_a = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend_a) as Arc<dyn SyncAdapter>)
        .build();
    let doc_a = engine_a.open::<MapModel>("d1").await.unwrap();
    doc_a.mutate(|data, txn| data.set(txn, "count", 7i64));
    doc_a.flush().await.unwrap();

    // The backend hands replica B the snapshot A pushed.
    let snapshot = backend_a
        .pushes()
        .into_iter()
        .find(|p| p.is_snapshot)
        .map(|p| p.update)
        .expect("replica A pushed a snapshot");

    let backend_b = MockSyncBackend::new();
    backend_b.set_pull_payload(snapshot);
    let engine_b = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .sync_adapter(Arc::clone(&backend_b) as Arc<dyn SyncAdapter>)
        .build();
    let doc_b = engine_b.open::<MapModel>("d1").await.unwrap();

    let count = doc_b.with_read(|data, txn| data.get_i64(txn, "count"));
    assert_eq!(count, Some(7));
}

#[tokio::test]
async fn test_live_collaboration_over_the_local_hub() {
    let hub = Arc::new(LocalRealtimeHub::new());

    let engine_a = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .realtime_adapter(Arc::clone(&hub) as Arc<dyn RealtimeAdapter>)
        .build();
    let engine_b = DocEngine::builder(Arc::new(MemoryStorage::new()) as Arc<dyn StorageAdapter>)
        .realtime_adapter(Arc::clone(&hub) as Arc<dyn RealtimeAdapter>)
        .build();

    let doc_a = engine_a.open::<MapModel>("shared").await.unwrap();
    let doc_b = engine_b.open::<MapModel>("shared").await.unwrap();

    doc_a.mutate(|data, txn| data.set(txn, "count", 11i64));
    doc_a.flush().await.unwrap();
    doc_b.flush().await.unwrap();

    let count = doc_b.with_read(|data, txn| data.get_i64(txn, "count"));
    assert_eq!(count, Some(11));

    // B's inbound apply was persisted locally but not re-published as B's
    // own authorship.
    assert_eq!(doc_b.status().pending_sync_len, 0);
}
