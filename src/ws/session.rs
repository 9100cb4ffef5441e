use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::relay::SyncRelay;
use super::room::Outbox;
use crate::models::{ClientEvent, ErrorMessage, PongMessage, RelayError, ServerEvent, SessionId};

/// Lifecycle of a session.
///
/// | From        | Event           | To                     | Effect                               |
/// |-------------|-----------------|------------------------|--------------------------------------|
/// | `Connected` | `get-document`  | `Joined`               | load/create, join, `load-document`   |
/// | `Joined`    | `get-document`  | `Joined`               | same, leaving the old room if needed |
/// | `Joined`    | `send-changes`  | `Joined`               | `receive-changes` to the others      |
/// | `Joined`    | `save-document` | `Joined`               | overwrite stored snapshot            |
/// | `Joined`    | `send-message`  | `Joined`               | `receive-message` unless blank       |
/// | any         | `ping`          | unchanged              | `pong`                               |
/// | any         | disconnect      | `Closed`               | leave room                           |
///
/// A failed `get-document` keeps the current state. Everything after
/// `Closed` is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Joined { document_id: String },
    Closed,
}

/// One client connection
pub struct Session {
    id: SessionId,
    state: SessionState,
    outbox: Outbox,
    relay: Arc<SyncRelay>,
}

impl Session {
    pub fn new(relay: Arc<SyncRelay>, outbox: Outbox) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connected,
            outbox,
            relay,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Parse and handle one text frame, answering failures with an `error`
    /// event.
    pub async fn handle_frame(&mut self, frame: &str) {
        let result = match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => self.handle(event).await,
            Err(e) => Err(RelayError::from(e)),
        };
        if let Err(e) = result {
            self.report(e).await;
        }
    }

    /// Answer a frame the transport could not hand over as text.
    pub async fn handle_frame_error(&self, error: RelayError) {
        if self.state != SessionState::Closed {
            self.report(error).await;
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) -> Result<(), RelayError> {
        if self.state == SessionState::Closed {
            debug!("Ignoring event on closed session {}", self.id);
            return Ok(());
        }

        match event {
            ClientEvent::GetDocument(document_id) => {
                self.get_document(document_id.unwrap_or_default()).await
            }
            ClientEvent::SendChanges(delta) => {
                let document_id = self.joined_document()?;
                self.relay.relay_changes(document_id, self.id, delta).await;
                Ok(())
            }
            ClientEvent::SaveDocument(data) => {
                let document_id = self.joined_document()?;
                self.relay.save_document(document_id, self.id, data).await
            }
            ClientEvent::SendMessage(text) => {
                let document_id = self.joined_document()?;
                self.relay.relay_message(document_id, self.id, text).await;
                Ok(())
            }
            ClientEvent::Ping => {
                let pong = PongMessage { date: Utc::now().to_rfc3339() };
                self.reply(ServerEvent::Pong(pong)).await;
                Ok(())
            }
        }
    }

    /// Leave the room and stop handling events.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Joined { document_id } = state {
            self.relay.close_session(&document_id, self.id).await;
        }
        info!("Session {} closed", self.id);
    }

    async fn get_document(&mut self, document_id: String) -> Result<(), RelayError> {
        let previous = match &self.state {
            SessionState::Joined { document_id } => Some(document_id.as_str()),
            _ => None,
        };

        self.relay
            .open_document(&document_id, self.id, self.outbox.clone(), previous)
            .await?;

        self.state = SessionState::Joined { document_id };
        Ok(())
    }

    fn joined_document(&self) -> Result<&str, RelayError> {
        match &self.state {
            SessionState::Joined { document_id } => Ok(document_id),
            _ => Err(RelayError::NotJoined),
        }
    }

    async fn reply(&self, event: ServerEvent) {
        if self.outbox.send(Arc::new(event)).await.is_err() {
            debug!("Session {} writer is gone, dropping reply", self.id);
        }
    }

    async fn report(&self, error: RelayError) {
        warn!("Request from session {} failed: {}", self.id, error);
        if let Some(code) = error.code() {
            let message = ErrorMessage { code, message: error.to_string() };
            self.reply(ServerEvent::Error(message)).await;
        }
    }
}
