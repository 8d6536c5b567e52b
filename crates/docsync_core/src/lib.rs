#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration: sync/snapshot policies and manual sync requests
pub mod config;

/// Optional byte transform for persisted and transported blobs
pub mod codec;

/// Per-document runtime state (status surface)
mod document;

/// Document registry and handles - the main entry point
pub mod engine;

/// Error (common error types and the background error hook)
pub mod error;

/// Observable sync-phase events
pub mod event;

/// In-memory storage adapter (tests, ephemeral hosts)
pub mod memory_storage;

/// Typed model views over a document's root containers
pub mod model;

/// Update origin classification
pub mod origin;

/// Live pub/sub transport contract and the in-process hub
pub mod realtime;

/// REST wire shape for the default sync transport
pub mod rest;

/// Per-document task serializer
mod serializer;

/// Storage adapter contract
pub mod storage;

/// Request/response sync backend contract
pub mod sync_adapter;

pub use codec::{IdentityCodec, UpdateCodec};
pub use config::{SnapshotPolicy, SnapshotSyncPolicy, SyncPolicy, SyncRequest};
pub use document::DocumentStatus;
pub use engine::{DocEngine, DocEngineBuilder, DocumentHandle};
pub use error::{DocsyncError, ErrorHook, Result};
pub use event::{EventSubscription, SyncDirection, SyncEvent, SyncEventListener, SyncPhase};
pub use memory_storage::MemoryStorage;
pub use model::{DocModel, MapModel};
pub use origin::UpdateOrigin;
pub use realtime::{InboundHandler, LocalRealtimeHub, RealtimeAdapter, RealtimeSubscription};
#[cfg(feature = "rest-sync")]
pub use rest::RestSyncAdapter;
pub use storage::{BoxFuture, SnapshotRecord, StorageAdapter};
pub use sync_adapter::{PullRequest, PushRequest, SyncAdapter};
