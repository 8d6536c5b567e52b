//! REST wire shape for the default sync transport.
//!
//! The protocol is two POST endpoints on a common base URL:
//!
//! - `POST {base}/pull`: the client describes what it has (a `lastSynced`
//!   checkpoint plus an optional state vector) and whether it wants a
//!   snapshot; the server answers with a snapshot or the updates recorded
//!   since the checkpoint, plus a new checkpoint.
//! - `POST {base}/push`: the client sends one opaque payload, flagged as
//!   snapshot or incremental; the server answers with the new checkpoint.
//!
//! Payloads travel base64-encoded inside JSON. Both bodies carry a
//! `documents` array so transports can batch; [`RestSyncAdapter`] always
//! sends single-document requests.
//!
//! The DTOs here are always compiled so hosts can implement their own
//! transport against them; the reqwest-backed [`RestSyncAdapter`] itself is
//! gated behind the `rest-sync` feature.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{DocsyncError, Result};

// ===========================================================================
// Wire DTOs
// ===========================================================================

/// Body of `POST {base}/pull`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestBody {
    /// Documents to pull, usually exactly one.
    pub documents: Vec<PullRequestDoc>,
}

/// One document entry in a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestDoc {
    /// Document id.
    pub id: String,

    /// Checkpoint returned by the server on the previous pull or push;
    /// `None` on the very first contact.
    pub last_synced: Option<String>,

    /// Ask for a full snapshot instead of incremental updates.
    pub request_snapshot: bool,

    /// Base64-encoded state vector, when the replica has one to offer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_vector: Option<String>,
}

/// Body of the `POST {base}/pull` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullResponseBody {
    /// One entry per requested document.
    pub documents: Vec<PullResponseDoc>,
}

/// One document entry in a pull response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponseDoc {
    /// Document id.
    pub id: String,

    /// Base64-encoded full snapshot, when one was requested or the server
    /// decided to send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    /// Base64-encoded incremental updates since the request's checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<Vec<String>>,

    /// New checkpoint to present on the next request.
    pub date_last_synced: Option<String>,
}

/// Body of `POST {base}/push`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequestBody {
    /// Documents to push, usually exactly one.
    pub documents: Vec<PushRequestDoc>,
}

/// One document entry in a push request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequestDoc {
    /// Document id.
    pub id: String,

    /// Base64-encoded payload.
    pub update: String,

    /// Whether the payload is a full-state snapshot.
    pub is_snapshot: bool,

    /// Checkpoint from the previous exchange, `None` on first contact.
    pub last_synced: Option<String>,
}

/// Body of the `POST {base}/push` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponseBody {
    /// One entry per pushed document.
    pub documents: Vec<PushResponseDoc>,
}

/// One document entry in a push response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponseDoc {
    /// Document id.
    pub id: String,

    /// New checkpoint to present on the next request.
    pub date_last_synced: Option<String>,
}

/// Base64-encode a payload for the wire.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 payload from the wire.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(payload)
        .map_err(|e| DocsyncError::Decode(format!("invalid base64 payload: {}", e)))
}

/// Collapse a pull response entry into the single opaque blob the runtime
/// applies: the snapshot if present, otherwise the updates merged through a
/// scratch replica, otherwise nothing.
pub fn merge_pull_payload(doc: &PullResponseDoc) -> Result<Option<Vec<u8>>> {
    use yrs::updates::decoder::Decode;
    use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

    if let Some(snapshot) = &doc.snapshot {
        return Ok(Some(decode_payload(snapshot)?));
    }

    let Some(updates) = &doc.updates else {
        return Ok(None);
    };
    if updates.is_empty() {
        return Ok(None);
    }
    if updates.len() == 1 {
        return Ok(Some(decode_payload(&updates[0])?));
    }

    // Merge through a scratch replica so the runtime applies one blob.
    let scratch = Doc::new();
    {
        let mut txn = scratch.transact_mut();
        for encoded in updates {
            let bytes = decode_payload(encoded)?;
            let update = Update::decode_v1(&bytes)
                .map_err(|e| DocsyncError::Decode(format!("invalid update payload: {}", e)))?;
            txn.apply_update(update)
                .map_err(|e| DocsyncError::Crdt(format!("failed to merge pulled update: {}", e)))?;
        }
    }
    let merged = scratch
        .transact()
        .encode_state_as_update_v1(&StateVector::default());
    Ok(Some(merged))
}

// ===========================================================================
// reqwest transport
// ===========================================================================

#[cfg(feature = "rest-sync")]
pub use self::client::RestSyncAdapter;

#[cfg(feature = "rest-sync")]
mod client {
    use std::collections::HashMap;
    use std::sync::RwLock;

    use super::*;
    use crate::storage::BoxFuture;
    use crate::sync_adapter::{PullRequest, PushRequest, SyncAdapter};

    /// Sync transport speaking the REST wire shape over `reqwest`.
    ///
    /// Tracks the per-document `dateLastSynced` checkpoint across calls;
    /// authentication, retries and deadlines belong to the `reqwest::Client`
    /// the host hands in (default headers, timeouts, middleware).
    pub struct RestSyncAdapter {
        client: reqwest::Client,
        base_url: String,
        checkpoints: RwLock<HashMap<String, String>>,
    }

    impl RestSyncAdapter {
        /// Create an adapter with a default client.
        pub fn new(base_url: impl Into<String>) -> Self {
            Self::with_client(reqwest::Client::new(), base_url)
        }

        /// Create an adapter over a host-configured client.
        pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
            let mut base_url = base_url.into();
            while base_url.ends_with('/') {
                base_url.pop();
            }
            Self {
                client,
                base_url,
                checkpoints: RwLock::new(HashMap::new()),
            }
        }

        fn checkpoint(&self, doc_id: &str) -> Option<String> {
            self.checkpoints.read().unwrap().get(doc_id).cloned()
        }

        fn store_checkpoint(&self, doc_id: &str, checkpoint: Option<String>) {
            if let Some(checkpoint) = checkpoint {
                self.checkpoints
                    .write()
                    .unwrap()
                    .insert(doc_id.to_string(), checkpoint);
            }
        }

        async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
            &self,
            endpoint: &str,
            body: &B,
        ) -> crate::error::Result<R> {
            let url = format!("{}/{}", self.base_url, endpoint);
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| DocsyncError::SyncTransport(format!("POST {} failed: {}", url, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(DocsyncError::SyncTransport(format!(
                    "POST {} returned {}",
                    url, status
                )));
            }

            response
                .json::<R>()
                .await
                .map_err(|e| DocsyncError::Decode(format!("malformed {} response: {}", endpoint, e)))
        }
    }

    impl SyncAdapter for RestSyncAdapter {
        fn pull<'a>(
            &'a self,
            request: PullRequest,
        ) -> BoxFuture<'a, crate::error::Result<Option<Vec<u8>>>> {
            Box::pin(async move {
                let body = PullRequestBody {
                    documents: vec![PullRequestDoc {
                        id: request.doc_id.clone(),
                        last_synced: self.checkpoint(&request.doc_id),
                        request_snapshot: request.request_snapshot,
                        state_vector: request.state_vector.as_deref().map(encode_payload),
                    }],
                };

                let response: PullResponseBody = self.post("pull", &body).await?;
                let Some(doc) = response
                    .documents
                    .into_iter()
                    .find(|d| d.id == request.doc_id)
                else {
                    return Ok(None);
                };

                self.store_checkpoint(&request.doc_id, doc.date_last_synced.clone());
                merge_pull_payload(&doc)
            })
        }

        fn push<'a>(&'a self, request: PushRequest) -> BoxFuture<'a, crate::error::Result<()>> {
            Box::pin(async move {
                let body = PushRequestBody {
                    documents: vec![PushRequestDoc {
                        id: request.doc_id.clone(),
                        update: encode_payload(&request.update),
                        is_snapshot: request.is_snapshot,
                        last_synced: self.checkpoint(&request.doc_id),
                    }],
                };

                let response: PushResponseBody = self.post("push", &body).await?;
                if let Some(doc) = response
                    .documents
                    .into_iter()
                    .find(|d| d.id == request.doc_id)
                {
                    self.store_checkpoint(&request.doc_id, doc.date_last_synced);
                }
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_serializes_camel_case() {
        let body = PullRequestBody {
            documents: vec![PullRequestDoc {
                id: "d1".into(),
                last_synced: None,
                request_snapshot: true,
                state_vector: None,
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        let doc = &json["documents"][0];
        assert_eq!(doc["id"], "d1");
        assert_eq!(doc["lastSynced"], serde_json::Value::Null);
        assert_eq!(doc["requestSnapshot"], true);
        // Absent state vector is omitted entirely.
        assert!(doc.get("stateVector").is_none());
    }

    #[test]
    fn test_pull_response_parses() {
        let json = r#"{
            "documents": [
                { "id": "d1", "updates": ["AQI="], "dateLastSynced": "2026-02-01T00:00:00Z" }
            ]
        }"#;
        let body: PullResponseBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.documents.len(), 1);
        assert_eq!(
            body.documents[0].date_last_synced.as_deref(),
            Some("2026-02-01T00:00:00Z")
        );
        assert!(body.documents[0].snapshot.is_none());
    }

    #[test]
    fn test_payload_roundtrip() {
        let bytes = vec![0u8, 1, 2, 250];
        let encoded = encode_payload(&bytes);
        assert_eq!(decode_payload(&encoded).unwrap(), bytes);
        assert!(decode_payload("not base64!!").is_err());
    }

    #[test]
    fn test_merge_pull_payload_prefers_snapshot() {
        let doc = PullResponseDoc {
            id: "d1".into(),
            snapshot: Some(encode_payload(b"snap")),
            updates: Some(vec![encode_payload(b"ignored")]),
            date_last_synced: None,
        };
        assert_eq!(merge_pull_payload(&doc).unwrap(), Some(b"snap".to_vec()));
    }

    #[test]
    fn test_merge_pull_payload_empty_means_up_to_date() {
        let doc = PullResponseDoc {
            id: "d1".into(),
            snapshot: None,
            updates: None,
            date_last_synced: Some("ts".into()),
        };
        assert_eq!(merge_pull_payload(&doc).unwrap(), None);

        let doc = PullResponseDoc {
            id: "d1".into(),
            snapshot: None,
            updates: Some(vec![]),
            date_last_synced: Some("ts".into()),
        };
        assert_eq!(merge_pull_payload(&doc).unwrap(), None);
    }

    #[test]
    fn test_merge_pull_payload_merges_multiple_updates() {
        use yrs::updates::decoder::Decode;
        use yrs::{Doc, GetString, ReadTxn, Text, Transact, Update};

        // Two sequential updates from the same replica.
        let source = Doc::new();
        let text = source.get_or_insert_text("t");
        let update1 = {
            let before = source.transact().state_vector();
            {
                let mut txn = source.transact_mut();
                text.insert(&mut txn, 0, "Hello");
            }
            source.transact().encode_state_as_update_v1(&before)
        };
        let update2 = {
            let before = source.transact().state_vector();
            {
                let mut txn = source.transact_mut();
                text.insert(&mut txn, 5, " World");
            }
            source.transact().encode_state_as_update_v1(&before)
        };

        let doc = PullResponseDoc {
            id: "d1".into(),
            snapshot: None,
            updates: Some(vec![encode_payload(&update1), encode_payload(&update2)]),
            date_last_synced: None,
        };
        let merged = merge_pull_payload(&doc).unwrap().unwrap();

        let target = Doc::new();
        let target_text = target.get_or_insert_text("t");
        {
            let mut txn = target.transact_mut();
            txn.apply_update(Update::decode_v1(&merged).unwrap()).unwrap();
        }
        let txn = target.transact();
        assert_eq!(target_text.get_string(&txn), "Hello World");
    }
}
