use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::{ErrorCode, SessionId};

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}

/// Failures reported by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document id must not be empty")]
    InvalidId,

    #[error("document '{0}' has never been created")]
    UnknownDocument(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        StoreError::Unavailable(error.to_string())
    }
}

/// Failures of a single request or a single receiver. None of them end the
/// connection that caused them.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("document id must not be empty")]
    InvalidId,

    #[error("document '{0}' has never been created")]
    UnknownDocument(String),

    #[error("document storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("session {0} could not be reached")]
    DeliveryFailure(SessionId),

    #[error("session has not joined a document")]
    NotJoined,

    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

impl RelayError {
    /// Code carried by the `error` event. `DeliveryFailure` concerns a
    /// receiver, not the requester, so it has none.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            RelayError::InvalidId => Some(ErrorCode::InvalidId),
            RelayError::UnknownDocument(_) => Some(ErrorCode::UnknownDocument),
            RelayError::StorageUnavailable(_) => Some(ErrorCode::StorageUnavailable),
            RelayError::NotJoined => Some(ErrorCode::NotJoined),
            RelayError::MalformedEvent(_) => Some(ErrorCode::MalformedEvent),
            RelayError::DeliveryFailure(_) => None,
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InvalidId => RelayError::InvalidId,
            StoreError::UnknownDocument(id) => RelayError::UnknownDocument(id),
            StoreError::Unavailable(reason) => RelayError::StorageUnavailable(reason),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(error: serde_json::Error) -> Self {
        RelayError::MalformedEvent(error.to_string())
    }
}
