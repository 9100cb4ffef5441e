use serde::{Deserialize, Serialize};
use crate::models::{Delta, Snapshot};

/// Events a client sends over the real-time channel.
///
/// Frames look like `{"event": "send-changes", "data": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// `None` when the client sent `null` for the id.
    #[serde(rename = "get-document")]
    GetDocument(Option<String>),
    #[serde(rename = "send-changes")]
    SendChanges(Delta),
    #[serde(rename = "save-document")]
    SaveDocument(Snapshot),
    #[serde(rename = "send-message")]
    SendMessage(String),
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidId,
    UnknownDocument,
    StorageUnavailable,
    NotJoined,
    MalformedEvent,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
}

/// Who is currently in a room
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMessage {
    pub members: usize,
}

/// Events the relay sends to a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "load-document")]
    LoadDocument(Snapshot),
    #[serde(rename = "load-messages")]
    LoadMessages(Vec<String>),
    #[serde(rename = "receive-changes")]
    ReceiveChanges(Delta),
    #[serde(rename = "receive-message")]
    ReceiveMessage(String),
    #[serde(rename = "presence")]
    Presence(PresenceMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_get_document() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"get-document","data":"doc1"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetDocument(Some("doc1".to_string())));
    }

    #[test]
    fn test_parse_get_document_null_id() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"get-document","data":null}"#).unwrap();
        assert_eq!(event, ClientEvent::GetDocument(None));
    }

    #[test]
    fn test_parse_send_changes_keeps_delta_opaque() {
        let frame = json!({
            "event": "send-changes",
            "data": {"ops": [{"insert": "hi"}, {"retain": 3, "attributes": {"bold": true}}]}
        });
        let event: ClientEvent = serde_json::from_value(frame.clone()).unwrap();
        assert_eq!(event, ClientEvent::SendChanges(frame["data"].clone()));
    }

    #[test]
    fn test_parse_ping_without_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(event, ClientEvent::Ping);
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let parsed = serde_json::from_str::<ClientEvent>(r#"{"event":"join-room","data":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_server_event_wire_shape() {
        let load = ServerEvent::LoadDocument(json!(""));
        assert_eq!(
            serde_json::to_value(&load).unwrap(),
            json!({"event": "load-document", "data": ""})
        );

        let presence = ServerEvent::Presence(PresenceMessage { members: 2 });
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            json!({"event": "presence", "data": {"members": 2}})
        );

        let error = ServerEvent::Error(ErrorMessage {
            code: ErrorCode::InvalidId,
            message: "document id must not be empty".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "event": "error",
                "data": {"code": "invalid-id", "message": "document id must not be empty"}
            })
        );
    }
}
