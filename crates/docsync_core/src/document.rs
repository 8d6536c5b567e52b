//! Per-document runtime state and coordination.
//!
//! A [`DocShared`] owns one document end to end: the in-memory `yrs` replica,
//! the counters and generations that drive snapshot cadence, the
//! pending-sync backlog, and the task queue that serializes every piece of
//! storage and network work for the document.
//!
//! # Update flow
//!
//! The replica's update hook is the single routing point. Every transaction
//! commit lands there with its origin tag and is classified:
//!
//! - storage-tagged updates were replayed during hydration and are ignored;
//! - sync- and realtime-tagged updates are persisted without joining the
//!   pending backlog, and are never pushed or published back;
//! - everything else is local authorship: persisted, appended to the
//!   pending backlog, pushed to the sync backend and published to realtime,
//!   in that order, as one task on the document's queue.
//!
//! Persistence always precedes network publication, so a crash can lose at
//! most work that no other replica has been told about.

use std::sync::{Arc, Mutex, Weak};

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::codec::UpdateCodec;
use crate::config::{SyncPolicy, SyncRequest};
use crate::error::{DocsyncError, ErrorHook, Result};
use crate::event::{EventBus, SyncDirection, SyncEvent, SyncPhase};
use crate::origin::{self, UpdateOrigin};
use crate::realtime::{InboundHandler, RealtimeAdapter, RealtimeSubscription};
use crate::serializer::TaskQueue;
use crate::storage::{CapabilityWarnings, StorageAdapter};
use crate::sync_adapter::{PullRequest, PushRequest, SyncAdapter};

/// Engine-wide collaborators shared by every document.
pub(crate) struct RuntimeCtx {
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) sync: Option<Arc<dyn SyncAdapter>>,
    pub(crate) realtime: Option<Arc<dyn RealtimeAdapter>>,
    pub(crate) codec: Arc<dyn UpdateCodec>,
    pub(crate) policy: SyncPolicy,
    pub(crate) events: EventBus,
    pub(crate) on_error: ErrorHook,
    pub(crate) warnings: CapabilityWarnings,
}

/// Observable snapshot of a document's runtime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStatus {
    /// Updates persisted since the last stored snapshot.
    pub updates_since_snapshot: u64,

    /// Update bytes persisted since the last stored snapshot.
    pub bytes_since_snapshot: u64,

    /// Number of snapshots stored over the document's lifetime.
    pub snapshot_generation: u64,

    /// Last snapshot generation acknowledged by a sync push.
    pub synced_snapshot_generation: u64,

    /// True until the first sync pull completes.
    pub is_brand_new: bool,

    /// Locally authored updates not yet acknowledged by a push.
    pub pending_sync_len: usize,
}

/// Mutable per-document state, guarded by the document mutex.
///
/// Lock discipline: never held across an await point; the task queue already
/// serializes the async work, the mutex only covers counter reads/writes.
#[derive(Default)]
struct DocState {
    updates_since_snapshot: u64,
    bytes_since_snapshot: u64,
    snapshot_generation: u64,
    synced_snapshot_generation: u64,
    is_brand_new: bool,
    pending_sync: Vec<Vec<u8>>,
    update_sub: Option<yrs::Subscription>,
    realtime_sub: Option<RealtimeSubscription>,
}

/// One managed document: replica, durable state bookkeeping, task queue.
pub(crate) struct DocShared {
    pub(crate) id: String,
    pub(crate) doc: Doc,
    state: Mutex<DocState>,
    pub(crate) queue: TaskQueue,
    pub(crate) ctx: Arc<RuntimeCtx>,
    /// Weak self-reference handed to the update hook, the realtime handler
    /// and queued tasks, so none of them keep a closed document alive.
    self_weak: Weak<DocShared>,
}

impl DocShared {
    /// Open a document: hydrate from storage, run the initial pull, wire the
    /// update hook and realtime subscription, replay the pending backlog.
    pub(crate) async fn open(id: String, ctx: Arc<RuntimeCtx>) -> Result<Arc<Self>> {
        let shared = Arc::new_cyclic(|weak| Self {
            id,
            doc: Doc::new(),
            state: Mutex::new(DocState::default()),
            queue: TaskQueue::new(),
            ctx,
            self_weak: weak.clone(),
        });

        shared.hydrate().await?;
        // A failed pull surfaces via events and the error hook but never
        // blocks opening; the document keeps whatever state hydration built.
        shared.initial_pull().await;
        shared.register_update_handler();
        shared.subscribe_realtime();
        shared.replay_backlog();

        Ok(shared)
    }

    // ==================== Hydration ====================

    /// Assemble stored state: snapshot record, update log, pending list.
    async fn hydrate(&self) -> Result<()> {
        let storage = &self.ctx.storage;
        let snapshot_record = storage.get_snapshot(&self.id).await?;
        let updates = storage.get_updates(&self.id).await?;
        let pending = storage.get_pending_sync(&self.id).await?;

        let is_brand_new = snapshot_record.is_none() && updates.is_none() && pending.is_none();

        if let Some(record) = &snapshot_record
            && let Some(blob) = &record.snapshot
        {
            // A corrupt stored snapshot is not fatal: the update log can
            // still rebuild the document.
            if let Err(err) = self.decode_and_apply(blob, origin::storage_origin()) {
                log::warn!("failed to apply stored snapshot for '{}': {}", self.id, err);
            }
        }
        for update in updates.iter().flatten() {
            if let Err(err) = self.decode_and_apply(update, origin::storage_origin()) {
                log::warn!("failed to apply stored update for '{}': {}", self.id, err);
            }
        }

        let mut state = self.state.lock().unwrap();
        if let Some(record) = snapshot_record {
            state.snapshot_generation = record.snapshot_generation;
            state.synced_snapshot_generation = record.synced_snapshot_generation;
        }
        state.pending_sync = pending.unwrap_or_default();
        state.is_brand_new = is_brand_new;
        Ok(())
    }

    /// The initial pull on open.
    ///
    /// Brand-new documents ask the server for a snapshot (unless policy says
    /// otherwise); everything else pulls incrementally. A pull that returned
    /// bytes is followed by a local `mark_synced` snapshot of the merged
    /// state, so the next cold start is a single read.
    async fn initial_pull(&self) {
        let Some(sync) = self.ctx.sync.clone() else {
            return;
        };
        let is_brand_new = self.state.lock().unwrap().is_brand_new;
        let request_snapshot =
            is_brand_new && self.ctx.policy.snapshot_sync.request_on_new_document;
        let state_vector = if request_snapshot {
            None
        } else {
            Some(self.encode_state_vector())
        };

        match self.pull_once(&sync, state_vector, request_snapshot).await {
            Ok(applied) => {
                self.state.lock().unwrap().is_brand_new = false;
                if applied
                    && let Err(err) = self.store_snapshot(true, true).await
                {
                    self.ctx.on_error.as_ref()(&err);
                }
            }
            Err(err) => {
                self.ctx.on_error.as_ref()(&err);
            }
        }
    }

    // ==================== Update dispatch ====================

    /// Register the replica's update hook.
    ///
    /// The hook runs synchronously inside transaction commit; it only
    /// classifies the origin and enqueues, so it never touches the document
    /// mutex or does I/O.
    fn register_update_handler(&self) {
        let weak = self.self_weak.clone();
        let sub = self
            .doc
            .observe_update_v1(move |txn, event| {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let kind = origin::classify(txn.origin());
                shared.dispatch_update(kind, event.update.clone());
            })
            .expect("failed to observe document updates");
        self.state.lock().unwrap().update_sub = Some(sub);
    }

    fn dispatch_update(&self, kind: UpdateOrigin, update: Vec<u8>) {
        match kind {
            // Replayed from storage during hydration: already durable.
            UpdateOrigin::Storage => {}

            // Received from a channel: persist, never echo back.
            UpdateOrigin::Sync | UpdateOrigin::Realtime => {
                let weak = self.self_weak.clone();
                self.queue.enqueue_detached(
                    async move {
                        let Some(shared) = weak.upgrade() else {
                            return Ok(());
                        };
                        shared.persist_update(&update, false).await.map(|_| ())
                    },
                    Arc::clone(&self.ctx.on_error),
                );
            }

            // Local authorship: persist, push, publish.
            UpdateOrigin::Local => {
                let weak = self.self_weak.clone();
                self.queue.enqueue_detached(
                    async move {
                        let Some(shared) = weak.upgrade() else {
                            return Ok(());
                        };
                        shared.run_local_update(update).await
                    },
                    Arc::clone(&self.ctx.on_error),
                );
            }
        }
    }

    // ==================== Persistence ====================

    /// Append a raw update to the durable log, optionally joining the
    /// pending-sync backlog, then consult the snapshot cadence.
    ///
    /// Returns the codec-encoded bytes as persisted.
    async fn persist_update(&self, raw: &[u8], mark_pending: bool) -> Result<Vec<u8>> {
        let encoded = self.ctx.codec.encode(raw)?;
        self.ctx.storage.append_update(&self.id, &encoded).await?;

        if mark_pending {
            let list = {
                let mut state = self.state.lock().unwrap();
                state.pending_sync.push(encoded.clone());
                state.pending_sync.clone()
            };
            self.ctx
                .warnings
                .check(self.ctx.storage.mark_pending_sync(&self.id, &list).await)?;
        }

        let snapshot_due = {
            let mut state = self.state.lock().unwrap();
            state.updates_since_snapshot += 1;
            state.bytes_since_snapshot += encoded.len() as u64;
            self.ctx
                .policy
                .snapshot_every
                .is_due(state.updates_since_snapshot, state.bytes_since_snapshot)
        };
        if snapshot_due {
            self.store_snapshot(false, true).await?;
        }

        Ok(encoded)
    }

    /// Store a full-state snapshot and bump the generation.
    ///
    /// The update log is never truncated; snapshots are bootstrap hints. When
    /// storage lacks `set_snapshot` the generation still advances in memory,
    /// so the sync handshake keeps working from the live replica.
    async fn store_snapshot(&self, mark_synced: bool, reset_counters: bool) -> Result<()> {
        let blob = self.encode_full_state();
        let encoded = self.ctx.codec.encode(&blob)?;
        self.ctx
            .warnings
            .check(self.ctx.storage.set_snapshot(&self.id, &encoded).await)?;

        let generation = {
            let mut state = self.state.lock().unwrap();
            state.snapshot_generation += 1;
            if mark_synced {
                state.synced_snapshot_generation = state.snapshot_generation;
            }
            if reset_counters {
                state.updates_since_snapshot = 0;
                state.bytes_since_snapshot = 0;
            }
            state.snapshot_generation
        };

        if mark_synced {
            self.ctx.warnings.check(
                self.ctx
                    .storage
                    .mark_snapshot_synced(&self.id, generation)
                    .await,
            )?;
        }
        log::debug!("stored snapshot generation {} for '{}'", generation, self.id);
        Ok(())
    }

    /// Drop the first `n` backlog entries and persist the remainder.
    async fn clear_pending_prefix(&self, n: usize) -> Result<()> {
        let remainder = {
            let mut state = self.state.lock().unwrap();
            let n = n.min(state.pending_sync.len());
            state.pending_sync.drain(..n);
            state.pending_sync.clone()
        };
        if remainder.is_empty() {
            self.ctx
                .warnings
                .check(self.ctx.storage.clear_pending_sync(&self.id).await)?;
        } else {
            self.ctx.warnings.check(
                self.ctx
                    .storage
                    .mark_pending_sync(&self.id, &remainder)
                    .await,
            )?;
        }
        Ok(())
    }

    // ==================== Sync orchestration ====================

    /// The full outgoing sequence for one locally authored update.
    async fn run_local_update(&self, raw: Vec<u8>) -> Result<()> {
        let encoded = self.persist_update(&raw, true).await?;

        if let Some(sync) = self.ctx.sync.clone() {
            if self.ctx.policy.pull_before_push {
                let state_vector = self.encode_state_vector();
                self.pull_once(&sync, Some(state_vector), false).await?;
            }
            self.sync_snapshot_if_needed(&sync).await?;
            self.push_pending_head(&sync).await?;
        }

        self.publish_update(&encoded).await;
        Ok(())
    }

    /// One push cycle without a new local update: used to drain the backlog
    /// replayed at open.
    async fn run_push_cycle(&self) -> Result<()> {
        let Some(sync) = self.ctx.sync.clone() else {
            return Ok(());
        };
        if self.ctx.policy.pull_before_push {
            let state_vector = self.encode_state_vector();
            self.pull_once(&sync, Some(state_vector), false).await?;
        }
        self.sync_snapshot_if_needed(&sync).await?;
        self.push_pending_head(&sync).await?;
        Ok(())
    }

    /// Enqueue one push cycle per backlog entry surviving from storage.
    fn replay_backlog(&self) {
        if self.ctx.sync.is_none() {
            return;
        }
        let backlog = self.state.lock().unwrap().pending_sync.len();
        for _ in 0..backlog {
            let weak = self.self_weak.clone();
            self.queue.enqueue_detached(
                async move {
                    let Some(shared) = weak.upgrade() else {
                        return Ok(());
                    };
                    shared.run_push_cycle().await
                },
                Arc::clone(&self.ctx.on_error),
            );
        }
    }

    /// Manual sync entry point; the request runs as one task on the queue.
    pub(crate) fn sync_now(
        &self,
        request: SyncRequest,
    ) -> impl std::future::Future<Output = Result<()>> + Send + 'static {
        let weak = self.self_weak.clone();
        self.queue.enqueue(async move {
            let Some(shared) = weak.upgrade() else {
                return Err(DocsyncError::TaskCancelled);
            };
            let sync = shared.ctx.sync.clone();

            if request.pull
                && let Some(sync) = &sync
            {
                let state_vector = shared.encode_state_vector();
                shared.pull_once(sync, Some(state_vector), false).await?;
            }
            if request.force_snapshot {
                shared.store_snapshot(false, true).await?;
            }
            if request.push
                && let Some(sync) = &sync
            {
                shared.sync_snapshot_if_needed(sync).await?;
                while shared.push_pending_head(sync).await? {}
            }
            Ok(())
        })
    }

    /// Pull once and apply the result with the sync origin tag.
    ///
    /// Returns whether any bytes were applied. Transport failures propagate;
    /// undecodable payloads are discarded and reported, leaving local state
    /// untouched and the cycle running.
    async fn pull_once(
        &self,
        sync: &Arc<dyn SyncAdapter>,
        state_vector: Option<Vec<u8>>,
        request_snapshot: bool,
    ) -> Result<bool> {
        self.emit(
            SyncEvent::new(&self.id, SyncDirection::Pull, SyncPhase::Start)
                .with_request_snapshot(request_snapshot),
        );

        let pulled = sync
            .pull(PullRequest {
                doc_id: self.id.clone(),
                state_vector,
                request_snapshot,
            })
            .await;

        match pulled {
            Ok(Some(payload)) => {
                match self.decode_and_apply(&payload, origin::sync_origin()) {
                    Ok(()) => {
                        self.emit(
                            SyncEvent::new(&self.id, SyncDirection::Pull, SyncPhase::Success)
                                .with_request_snapshot(request_snapshot)
                                .with_bytes(payload.len()),
                        );
                        Ok(true)
                    }
                    Err(err) => {
                        // Malformed payload: discard, keep the cycle alive.
                        self.emit(
                            SyncEvent::new(&self.id, SyncDirection::Pull, SyncPhase::Error)
                                .with_request_snapshot(request_snapshot)
                                .with_error(&err),
                        );
                        self.ctx.on_error.as_ref()(&err);
                        Ok(false)
                    }
                }
            }
            Ok(None) => {
                self.emit(
                    SyncEvent::new(&self.id, SyncDirection::Pull, SyncPhase::Success)
                        .with_request_snapshot(request_snapshot),
                );
                Ok(false)
            }
            Err(err) => {
                self.emit(
                    SyncEvent::new(&self.id, SyncDirection::Pull, SyncPhase::Error)
                        .with_request_snapshot(request_snapshot)
                        .with_error(&err),
                );
                Err(err)
            }
        }
    }

    /// Bring the server's snapshot up to date before incremental pushes.
    ///
    /// A document that has never snapshotted takes one first. The snapshot is
    /// then pushed when the local generation is ahead of the synced one,
    /// subject to the send policy (the very first snapshot is always sent).
    async fn sync_snapshot_if_needed(&self, sync: &Arc<dyn SyncAdapter>) -> Result<()> {
        if self.state.lock().unwrap().snapshot_generation == 0 {
            self.store_snapshot(false, true).await?;
        }

        let (generation, synced) = {
            let state = self.state.lock().unwrap();
            (state.snapshot_generation, state.synced_snapshot_generation)
        };
        let send_allowed = self.ctx.policy.snapshot_sync.send || synced == 0;
        if generation <= synced || !send_allowed {
            return Ok(());
        }

        let blob = self.encode_full_state();
        let encoded = self.ctx.codec.encode(&blob)?;
        self.push_once(sync, encoded, true).await?;

        self.state.lock().unwrap().synced_snapshot_generation = generation;
        self.ctx.warnings.check(
            self.ctx
                .storage
                .mark_snapshot_synced(&self.id, generation)
                .await,
        )?;
        Ok(())
    }

    /// Push the head of the pending backlog; on success drop it and persist
    /// the shorter list. Returns whether an entry was pushed.
    async fn push_pending_head(&self, sync: &Arc<dyn SyncAdapter>) -> Result<bool> {
        let head = self.state.lock().unwrap().pending_sync.first().cloned();
        let Some(head) = head else {
            return Ok(false);
        };
        self.push_once(sync, head, false).await?;
        self.clear_pending_prefix(1).await?;
        Ok(true)
    }

    /// One push against the backend, wrapped in start/success/error events.
    async fn push_once(
        &self,
        sync: &Arc<dyn SyncAdapter>,
        payload: Vec<u8>,
        is_snapshot: bool,
    ) -> Result<()> {
        let bytes = payload.len();
        self.emit(
            SyncEvent::new(&self.id, SyncDirection::Push, SyncPhase::Start)
                .with_snapshot(is_snapshot)
                .with_bytes(bytes),
        );

        let pushed = sync
            .push(PushRequest {
                doc_id: self.id.clone(),
                update: payload,
                is_snapshot,
            })
            .await;

        match pushed {
            Ok(()) => {
                self.emit(
                    SyncEvent::new(&self.id, SyncDirection::Push, SyncPhase::Success)
                        .with_snapshot(is_snapshot)
                        .with_bytes(bytes),
                );
                Ok(())
            }
            Err(err) => {
                self.emit(
                    SyncEvent::new(&self.id, SyncDirection::Push, SyncPhase::Error)
                        .with_snapshot(is_snapshot)
                        .with_bytes(bytes)
                        .with_error(&err),
                );
                Err(err)
            }
        }
    }

    // ==================== Realtime ====================

    fn subscribe_realtime(&self) {
        let Some(realtime) = self.ctx.realtime.clone() else {
            return;
        };

        let weak = self.self_weak.clone();
        let handler: InboundHandler = Arc::new(move |payload: &[u8]| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let payload = payload.to_vec();
            let on_error = Arc::clone(&shared.ctx.on_error);
            let task_shared = Arc::clone(&shared);
            // Inbound payloads apply in arrival order through the queue.
            shared.queue.enqueue_detached(
                async move { task_shared.decode_and_apply(&payload, origin::realtime_origin()) },
                on_error,
            );
        });

        match realtime.subscribe(&self.id, handler) {
            Ok(sub) => {
                self.state.lock().unwrap().realtime_sub = Some(sub);
            }
            Err(err) => {
                self.ctx.on_error.as_ref()(&err);
            }
        }
    }

    /// Publish a persisted (and, when sync is configured, pushed) update.
    /// Failures are non-fatal; the update is already durable.
    async fn publish_update(&self, encoded: &[u8]) {
        let Some(realtime) = self.ctx.realtime.clone() else {
            return;
        };
        if let Err(err) = realtime.publish(&self.id, encoded).await {
            self.ctx.on_error.as_ref()(&err);
        }
    }

    // ==================== Replica access ====================

    /// Decode a codec-encoded payload and apply it with the given origin tag.
    fn decode_and_apply(&self, payload: &[u8], origin: yrs::Origin) -> Result<()> {
        let raw = self.ctx.codec.decode(payload)?;
        let update = Update::decode_v1(&raw)
            .map_err(|e| DocsyncError::Decode(format!("invalid update payload: {}", e)))?;
        let mut txn = self.doc.transact_mut_with(origin);
        txn.apply_update(update)
            .map_err(|e| DocsyncError::Crdt(format!("failed to apply update: {}", e)))?;
        Ok(())
    }

    /// Encode the replica's state vector.
    pub(crate) fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode the full replica state as one update blob.
    fn encode_full_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    // ==================== Lifecycle & introspection ====================

    /// Detach the update hook and cancel the realtime subscription.
    ///
    /// In-flight queue tasks finish on their own; their results are
    /// discarded along with the document.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.update_sub.take();
        state.realtime_sub.take();
    }

    pub(crate) fn status(&self) -> DocumentStatus {
        let state = self.state.lock().unwrap();
        DocumentStatus {
            updates_since_snapshot: state.updates_since_snapshot,
            bytes_since_snapshot: state.bytes_since_snapshot,
            snapshot_generation: state.snapshot_generation,
            synced_snapshot_generation: state.synced_snapshot_generation,
            is_brand_new: state.is_brand_new,
            pending_sync_len: state.pending_sync.len(),
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.ctx.events.emit(&event, &self.ctx.on_error);
    }
}

impl std::fmt::Debug for DocShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("DocShared")
            .field("id", &self.id)
            .field("status", &status)
            .finish_non_exhaustive()
    }
}
