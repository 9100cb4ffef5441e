use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::DocumentStore;
use crate::models::{is_valid_document_id, Document, Snapshot, StoreError};

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        if !is_valid_document_id(id) {
            return Err(StoreError::InvalidId);
        }

        {
            let documents = self.documents.read().await;
            if let Some(doc) = documents.get(id) {
                return Ok(doc.clone());
            }
        }

        // Re-check under the write lock, a concurrent caller may have won.
        let mut documents = self.documents.write().await;
        let doc = documents
            .entry(id.to_string())
            .or_insert_with(|| Document::new(id));
        Ok(doc.clone())
    }

    async fn save(&self, id: &str, data: Snapshot) -> Result<(), StoreError> {
        if !is_valid_document_id(id) {
            return Err(StoreError::InvalidId);
        }

        let mut documents = self.documents.write().await;
        match documents.get_mut(id) {
            Some(doc) => {
                doc.data = data;
                doc.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::UnknownDocument(id.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
