//! Durable blob-tier store. Wraps any `object_store::ObjectStore` backend
//! (local disk or S3-compatible) and writes only when content changed, with
//! best-effort semantics: failures are logged and never propagated to the
//! scheduler (spec §4.6/§5).

use std::sync::Arc;

use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

use crate::document::StateDocument;

pub struct DurableStore {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    last_hash: Mutex<Option<[u8; 32]>>,
}

impl DurableStore {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            path: ObjectPath::from(key.into()),
            last_hash: Mutex::new(None),
        }
    }

    /// Opens a local-disk-backed durable store rooted at `root`, storing the
    /// document under `key` within it.
    pub fn local_disk(root: &std::path::Path, prefix: &str, key: &str) -> crate::error::Result<Self> {
        std::fs::create_dir_all(root)?;
        let fs = object_store::local::LocalFileSystem::new_with_prefix(root)
            .map_err(crate::error::PersistenceError::ObjectStore)?;
        let full_key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        };
        Ok(Self::new(Arc::new(fs), full_key))
    }

    /// Loads the durable document, returning `None` on any failure
    /// (missing blob, transport error, corrupt payload) — a load failure
    /// here just means the hot tier or an empty document wins.
    pub async fn load(&self) -> Option<StateDocument> {
        let result = match self.store.get(&self.path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return None,
            Err(err) => {
                warn!(error = %err, "durable state read failed");
                return None;
            }
        };
        let bytes = match result.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "durable state read failed mid-stream");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(document) => Some(document),
            Err(err) => {
                warn!(error = %err, "durable state file corrupt, ignoring");
                None
            }
        }
    }

    /// Writes `document` if its content hash differs from the last write
    /// this process made. Never returns an error: failures are logged and
    /// swallowed (spec §4.6: "best-effort... do not block the scheduler").
    pub async fn save(&self, document: &StateDocument) {
        let bytes = match serde_json::to_vec(document) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to serialize state for durable write");
                return;
            }
        };

        let hash: [u8; 32] = Sha256::digest(&bytes).into();
        {
            let last = self.last_hash.lock().await;
            if last.as_ref() == Some(&hash) {
                return;
            }
        }

        match self.store.put(&self.path, PutPayload::from(bytes)).await {
            Ok(_) => {
                *self.last_hash.lock().await = Some(hash);
            }
            Err(err) => warn!(error = %err, "durable state write failed, continuing"),
        }
    }
}
