pub mod dbrelay;
pub mod memory;

use async_trait::async_trait;

use crate::models::{Document, Snapshot, StoreError};

pub use dbrelay::PgDocumentStore;
pub use memory::MemoryDocumentStore;

/// Durable document state.
///
/// Implementations refuse empty ids with [`StoreError::InvalidId`] and must
/// make `load_or_create` idempotent per id: two calls for an unseen id end
/// with a single stored document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Return the document for `id`, creating it with an empty snapshot first
    /// if it has never been seen.
    async fn load_or_create(&self, id: &str) -> Result<Document, StoreError>;

    /// Overwrite the snapshot of an existing document. Last write wins.
    async fn save(&self, id: &str, data: Snapshot) -> Result<(), StoreError>;

    /// Check that the backing storage is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
