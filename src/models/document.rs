use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Incremental edit produced by the editor. Relayed unmodified.
pub type Delta = serde_json::Value;

/// Full serialized document state. Stored and returned unmodified.
pub type Snapshot = serde_json::Value;

/// Identifies one connected client for its lifetime.
pub type SessionId = Uuid;

/// A persisted document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub data: Snapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// A freshly created document holds an empty string.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data: empty_snapshot(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The snapshot every new document starts with.
pub fn empty_snapshot() -> Snapshot {
    Snapshot::String(String::new())
}

/// A document id is usable when it has at least one non-whitespace character.
pub fn is_valid_document_id(id: &str) -> bool {
    !id.trim().is_empty()
}
