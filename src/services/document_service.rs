use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::db::DocumentStore;
use crate::models::{is_valid_document_id, Document, Snapshot, StoreError};

/// Front door to the document store.
///
/// Holds one async mutex per document id while `load_or_create` runs, so
/// sessions racing to open an unseen document are served one at a time. Idle
/// guards expire from the cache on their own.
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    guards: Cache<String, Arc<Mutex<()>>>,
}

impl DocumentService {
    pub fn new(store: Arc<dyn DocumentStore>, guard_idle: Duration) -> Self {
        Self {
            store,
            guards: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(guard_idle)
                .build(),
        }
    }

    pub async fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        if !is_valid_document_id(id) {
            warn!("Rejected load for empty document id");
            return Err(StoreError::InvalidId);
        }

        let guard = self
            .guards
            .get_with(id.to_string(), || Arc::new(Mutex::new(())));
        let _held = guard.lock().await;

        debug!("Loading document {}", id);
        self.store.load_or_create(id).await.inspect_err(|e| {
            error!("Failed to load document '{}': {}", id, e);
        })
    }

    pub async fn save(&self, id: &str, data: Snapshot) -> Result<(), StoreError> {
        if !is_valid_document_id(id) {
            return Err(StoreError::InvalidId);
        }

        self.store.save(id, data).await.inspect_err(|e| match e {
            StoreError::UnknownDocument(_) => warn!("Save rejected: {}", e),
            _ => error!("Failed to save document '{}': {}", id, e),
        })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
