//! Document registry and public handle surface.
//!
//! A [`DocEngine`] owns the adapters, policies and event bus, and keeps
//! exactly one live document per id. Opening is idempotent: a second `open`
//! of the same id returns a handle to the same replica (and fails if it asks
//! for a different model type).
//!
//! # Example
//!
//! ```ignore
//! use docsync_core::{DocEngine, MapModel, MemoryStorage, SyncRequest};
//! use std::sync::Arc;
//!
//! let engine = DocEngine::builder(Arc::new(MemoryStorage::new()))
//!     .sync_adapter(my_backend)
//!     .build();
//! let doc = engine.open::<MapModel>("notes").await?;
//!
//! doc.mutate(|data, txn| data.set(txn, "count", 3i64));
//! doc.flush().await?;
//! doc.sync(SyncRequest::default()).await?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use yrs::{Origin, Transaction, TransactionMut};

use crate::codec::{IdentityCodec, UpdateCodec};
use crate::config::{SyncPolicy, SyncRequest};
use crate::document::{DocShared, DocumentStatus, RuntimeCtx};
use crate::error::{DocsyncError, ErrorHook, Result, default_error_hook};
use crate::event::{EventBus, EventSubscription, SyncEventListener};
use crate::model::DocModel;
use crate::origin;
use crate::realtime::RealtimeAdapter;
use crate::storage::{CapabilityWarnings, StorageAdapter};
use crate::sync_adapter::SyncAdapter;

/// Configures and builds a [`DocEngine`].
pub struct DocEngineBuilder {
    storage: Arc<dyn StorageAdapter>,
    sync: Option<Arc<dyn SyncAdapter>>,
    realtime: Option<Arc<dyn RealtimeAdapter>>,
    codec: Arc<dyn UpdateCodec>,
    policy: SyncPolicy,
    on_error: ErrorHook,
}

impl DocEngineBuilder {
    /// Attach a request/response sync backend.
    pub fn sync_adapter(mut self, sync: Arc<dyn SyncAdapter>) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Attach a live pub/sub transport.
    pub fn realtime_adapter(mut self, realtime: Arc<dyn RealtimeAdapter>) -> Self {
        self.realtime = Some(realtime);
        self
    }

    /// Replace the identity codec.
    pub fn codec(mut self, codec: Arc<dyn UpdateCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the default policies.
    pub fn policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the default error hook (which logs via `log::error!`).
    pub fn error_hook(mut self, on_error: ErrorHook) -> Self {
        self.on_error = on_error;
        self
    }

    /// Build the engine.
    pub fn build(self) -> DocEngine {
        DocEngine {
            inner: Arc::new(EngineInner {
                ctx: Arc::new(RuntimeCtx {
                    storage: self.storage,
                    sync: self.sync,
                    realtime: self.realtime,
                    codec: self.codec,
                    policy: self.policy,
                    events: EventBus::new(),
                    on_error: self.on_error,
                    warnings: CapabilityWarnings::new(),
                }),
                docs: Mutex::new(HashMap::new()),
            }),
        }
    }
}

struct DocEntry {
    shared: Arc<DocShared>,
    view: Arc<dyn Any + Send + Sync>,
}

struct EngineInner {
    ctx: Arc<RuntimeCtx>,
    docs: Mutex<HashMap<String, DocEntry>>,
}

/// Registry of live documents plus the engine-wide adapters and policies.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct DocEngine {
    inner: Arc<EngineInner>,
}

impl DocEngine {
    /// Start configuring an engine over a storage adapter.
    pub fn builder(storage: Arc<dyn StorageAdapter>) -> DocEngineBuilder {
        DocEngineBuilder {
            storage,
            sync: None,
            realtime: None,
            codec: Arc::new(IdentityCodec),
            policy: SyncPolicy::default(),
            on_error: default_error_hook(),
        }
    }

    /// An engine with no sync or realtime transport, the identity codec and
    /// default policies.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self::builder(storage).build()
    }

    /// Open a document, hydrating it from storage and (when configured)
    /// running the initial pull. Idempotent per id.
    pub async fn open<M: DocModel>(&self, id: &str) -> Result<DocumentHandle<M>> {
        if let Some(handle) = self.existing_handle::<M>(id)? {
            return Ok(handle);
        }

        let shared = DocShared::open(id.to_string(), Arc::clone(&self.inner.ctx)).await?;
        let view: Arc<M> = Arc::new(M::attach(&shared.doc));

        let mut docs = self.inner.docs.lock().unwrap();
        if docs.contains_key(id) {
            // Lost an open race; use the winner and let ours drop.
            drop(docs);
            shared.shutdown();
            return self
                .existing_handle::<M>(id)?
                .ok_or_else(|| DocsyncError::NotLoaded(id.to_string()));
        }
        docs.insert(
            id.to_string(),
            DocEntry {
                shared: Arc::clone(&shared),
                view: Arc::clone(&view) as Arc<dyn Any + Send + Sync>,
            },
        );
        drop(docs);

        Ok(DocumentHandle {
            shared,
            view,
            engine: Arc::downgrade(&self.inner),
        })
    }

    fn existing_handle<M: DocModel>(&self, id: &str) -> Result<Option<DocumentHandle<M>>> {
        let docs = self.inner.docs.lock().unwrap();
        let Some(entry) = docs.get(id) else {
            return Ok(None);
        };
        let view = Arc::clone(&entry.view)
            .downcast::<M>()
            .map_err(|_| DocsyncError::ModelMismatch(id.to_string()))?;
        Ok(Some(DocumentHandle {
            shared: Arc::clone(&entry.shared),
            view,
            engine: Arc::downgrade(&self.inner),
        }))
    }

    /// Close a document: detach the update hook, cancel the realtime
    /// subscription and forget the registry entry. Storage is kept.
    pub fn close(&self, id: &str) -> Result<()> {
        let entry = self
            .inner
            .docs
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| DocsyncError::NotLoaded(id.to_string()))?;
        entry.shared.shutdown();
        Ok(())
    }

    /// Remove a document: close it and delete every storage record.
    ///
    /// In-flight sync tasks finish first; the deletion runs behind them on
    /// the document's queue, so nothing re-persists after it.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let entry = self
            .inner
            .docs
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| DocsyncError::NotLoaded(id.to_string()))?;
        entry.shared.shutdown();

        let storage = Arc::clone(&self.inner.ctx.storage);
        let doc_id = id.to_string();
        let deletion = entry
            .shared
            .queue
            .enqueue(async move { storage.remove(&doc_id).await });
        drop(entry);
        deletion.await
    }

    /// Run a manual sync for an open document.
    ///
    /// Fails with [`DocsyncError::NotLoaded`] before any work is enqueued
    /// when the id is unknown.
    pub async fn sync_now(&self, id: &str, request: SyncRequest) -> Result<()> {
        let shared = self.lookup(id)?;
        shared.sync_now(request).await
    }

    /// Await completion of all queued background work for a document.
    pub async fn flush(&self, id: &str) -> Result<()> {
        let shared = self.lookup(id)?;
        shared.queue.barrier().await
    }

    /// Register a listener for sync-phase events.
    pub fn on_sync_event(&self, listener: SyncEventListener) -> EventSubscription {
        self.inner.ctx.events.subscribe(listener)
    }

    /// Ids of all currently open documents.
    pub fn open_documents(&self) -> Vec<String> {
        self.inner.docs.lock().unwrap().keys().cloned().collect()
    }

    fn lookup(&self, id: &str) -> Result<Arc<DocShared>> {
        let docs = self.inner.docs.lock().unwrap();
        docs.get(id)
            .map(|entry| Arc::clone(&entry.shared))
            .ok_or_else(|| DocsyncError::NotLoaded(id.to_string()))
    }
}

impl std::fmt::Debug for DocEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocEngine")
            .field("open_documents", &self.open_documents())
            .finish()
    }
}

/// Handle to one open document.
///
/// Clones share the replica. The handle stays usable for reads and mutations
/// after `close`; mutations made then are still committed to the replica but
/// no longer persisted, pushed or published.
pub struct DocumentHandle<M: DocModel> {
    shared: Arc<DocShared>,
    view: Arc<M>,
    engine: Weak<EngineInner>,
}

impl<M: DocModel> Clone for DocumentHandle<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            view: Arc::clone(&self.view),
            engine: Weak::clone(&self.engine),
        }
    }
}

impl<M: DocModel> DocumentHandle<M> {
    /// The document id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The typed model view.
    pub fn data(&self) -> &M {
        &self.view
    }

    /// Read through the model view inside one read transaction.
    pub fn with_read<R>(&self, f: impl FnOnce(&M, &Transaction<'_>) -> R) -> R {
        let txn = yrs::Transact::transact(&self.shared.doc);
        f(&self.view, &txn)
    }

    /// Mutate the document inside one CRDT transaction.
    ///
    /// All changes made by `f` emit as a single update, which is persisted,
    /// pushed and published in the background.
    pub fn mutate<R>(&self, f: impl FnOnce(&M, &mut TransactionMut<'_>) -> R) -> R {
        self.mutate_with_origin(origin::local_origin(), f)
    }

    /// Mutate with a caller-supplied origin tag.
    ///
    /// Any tag counts as local authorship; the tag is visible to other
    /// `yrs` observers the host may have registered on the same replica.
    pub fn mutate_with_origin<R>(
        &self,
        origin: impl Into<Origin>,
        f: impl FnOnce(&M, &mut TransactionMut<'_>) -> R,
    ) -> R {
        let mut txn = yrs::Transact::transact_mut_with(&self.shared.doc, origin.into());
        f(&self.view, &mut txn)
    }

    /// Run a manual sync for this document.
    pub async fn sync(&self, request: SyncRequest) -> Result<()> {
        self.shared.sync_now(request).await
    }

    /// Await completion of all queued background work for this document.
    pub async fn flush(&self) -> Result<()> {
        self.shared.queue.barrier().await
    }

    /// Current counters, generations and backlog length.
    pub fn status(&self) -> DocumentStatus {
        self.shared.status()
    }

    /// Close this document in its engine. Storage is kept.
    pub fn close(self) -> Result<()> {
        let inner = self
            .engine
            .upgrade()
            .ok_or_else(|| DocsyncError::NotLoaded(self.shared.id.clone()))?;
        DocEngine { inner }.close(&self.shared.id)
    }

    /// Remove this document: close it and delete its storage records.
    pub async fn remove(self) -> Result<()> {
        let inner = self
            .engine
            .upgrade()
            .ok_or_else(|| DocsyncError::NotLoaded(self.shared.id.clone()))?;
        let id = self.shared.id.clone();
        drop(self.shared);
        DocEngine { inner }.remove(&id).await
    }
}

impl<M: DocModel> std::fmt::Debug for DocumentHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentHandle")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
