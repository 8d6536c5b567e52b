//! Optional byte transform applied to every persisted or transported blob.
//!
//! The codec sits between the CRDT and the outside world: updates are encoded
//! before they reach storage, the sync backend or the realtime transport, and
//! decoded on the way back in. The default is an identity pass-through; hosts
//! supply their own implementation for compression or encryption.

use crate::error::Result;

/// Byte transform for persisted and transported update blobs.
///
/// Implementations must be symmetric: `decode(encode(x)) == x`. Decode
/// failures surface as [`DocsyncError::Decode`](crate::DocsyncError::Decode)
/// and cause the inbound blob to be discarded without touching local state.
pub trait UpdateCodec: Send + Sync {
    /// Transform an update before it is persisted or transported.
    fn encode(&self, update: &[u8]) -> Result<Vec<u8>>;

    /// Reverse [`encode`](UpdateCodec::encode) on a stored or received blob.
    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// The default codec: bytes pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl UpdateCodec for IdentityCodec {
    fn encode(&self, update: &[u8]) -> Result<Vec<u8>> {
        Ok(update.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}
