use tracing::{debug, info, warn};

use super::room::{BroadcastReport, JoinedRoom, Outbox, RoomRegistry};
use crate::models::{is_valid_document_id, Delta, RelayError, ServerEvent, SessionId, Snapshot};
use crate::services::DocumentService;

/// Routes session events to rooms and the document store.
pub struct SyncRelay {
    documents: DocumentService,
    rooms: RoomRegistry,
}

impl SyncRelay {
    pub fn new(documents: DocumentService, rooms: RoomRegistry) -> Self {
        Self { documents, rooms }
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Load (or create) `document_id` and put the session in its room. The
    /// snapshot and chat history are queued on `outbox` by the join itself.
    ///
    /// `previous` is the room the session is leaving for this one. It is only
    /// left once the new document has loaded, so a failed load keeps the
    /// session where it was.
    pub async fn open_document(
        &self,
        document_id: &str,
        session_id: SessionId,
        outbox: Outbox,
        previous: Option<&str>,
    ) -> Result<JoinedRoom, RelayError> {
        if !is_valid_document_id(document_id) {
            return Err(RelayError::InvalidId);
        }

        let document = self.documents.load_or_create(document_id).await?;

        if let Some(previous) = previous.filter(|p| *p != document_id) {
            info!("Session {} switching from {} to {}", session_id, previous, document_id);
            self.rooms.leave(previous, session_id).await;
        }
        let joined = self
            .rooms
            .join(document_id, session_id, outbox, document.data)
            .await?;
        info!(
            "Session {} opened document {} ({} members)",
            session_id, document_id, joined.members
        );
        Ok(joined)
    }

    pub async fn relay_changes(&self, document_id: &str, from: SessionId, delta: Delta) -> BroadcastReport {
        let report = self
            .rooms
            .broadcast(document_id, ServerEvent::ReceiveChanges(delta), Some(from))
            .await;
        debug!(
            "Relayed changes from {} in {} to {} sessions",
            from, document_id, report.delivered
        );
        report
    }

    /// Persist a full snapshot. Only members of the document's room may save.
    pub async fn save_document(&self, document_id: &str, from: SessionId, data: Snapshot) -> Result<(), RelayError> {
        if !self.rooms.is_member(document_id, from).await {
            warn!("Session {} tried to save {} without joining it", from, document_id);
            return Err(RelayError::NotJoined);
        }
        self.documents.save(document_id, data).await?;
        debug!("Session {} saved document {}", from, document_id);
        Ok(())
    }

    /// Relay a chat message. Blank messages are dropped and return `None`.
    pub async fn relay_message(&self, document_id: &str, from: SessionId, text: String) -> Option<BroadcastReport> {
        if text.trim().is_empty() {
            debug!("Ignoring blank chat message from {}", from);
            return None;
        }
        Some(self.rooms.broadcast_message(document_id, text, Some(from)).await)
    }

    pub async fn close_session(&self, document_id: &str, session_id: SessionId) {
        self.rooms.leave(document_id, session_id).await;
    }
}
