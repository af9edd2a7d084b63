use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PresenceIntent {
    pub document_id: Option<i64>,
    pub user_id: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SectionEditIntent {
    pub document_id: Option<i64>,
    pub section_id: Option<i64>,
    pub user_id: Option<i64>,
    pub content: Option<String>,
    pub cursor_position: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SectionLockIntent {
    pub document_id: Option<i64>,
    pub section_id: Option<i64>,
    pub user_id: Option<i64>,
    pub duration_minutes: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SectionUnlockIntent {
    pub document_id: Option<i64>,
    pub section_id: Option<i64>,
    pub user_id: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ChatIntent {
    pub document_id: Option<i64>,
    pub user_id: Option<i64>,
    pub message: Option<String>,
}

/// Client intents received over a collaboration connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceivedMessage {
    JoinDocument(PresenceIntent),
    LeaveDocument(PresenceIntent),
    SectionEdit(SectionEditIntent),
    SectionLock(SectionLockIntent),
    SectionUnlock(SectionUnlockIntent),
    ChatMessage(ChatIntent),
}

impl ReceivedMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ReceivedMessage::JoinDocument(_) => "join_document",
            ReceivedMessage::LeaveDocument(_) => "leave_document",
            ReceivedMessage::SectionEdit(_) => "section_edit",
            ReceivedMessage::SectionLock(_) => "section_lock",
            ReceivedMessage::SectionUnlock(_) => "section_unlock",
            ReceivedMessage::ChatMessage(_) => "chat_message",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentUser {
    pub user_id: i64,
    pub full_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DocumentUsersEvent {
    pub users: Vec<DocumentUser>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectionUpdateEvent {
    pub section_id: i64,
    pub user_id: i64,
    pub content: Option<String>,
    pub cursor_position: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectionLockedEvent {
    pub section_id: i64,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LockDeniedEvent {
    pub section_id: i64,
    pub locked_by: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SectionUnlockedEvent {
    pub section_id: i64,
    pub user_id: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub user_id: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Events sent to a single connection or fanned out to a document room
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendMessage {
    Error(ErrorEvent),
    UserJoined(PresenceEvent),
    DocumentUsers(DocumentUsersEvent),
    UserLeft(PresenceEvent),
    SectionUpdate(SectionUpdateEvent),
    SectionLocked(SectionLockedEvent),
    LockDenied(LockDeniedEvent),
    SectionUnlocked(SectionUnlockedEvent),
    NewMessage(ChatEvent),
}

impl SendMessage {
    pub fn error(message: impl Into<String>) -> Self {
        SendMessage::Error(ErrorEvent { message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn intents_parse_from_tagged_json() {
        let raw = r#"{"type":"section_lock","document_id":1,"section_id":7,"user_id":3}"#;
        let msg: ReceivedMessage = serde_json::from_str(raw).unwrap();
        assert_matches!(
            msg,
            ReceivedMessage::SectionLock(SectionLockIntent {
                document_id: Some(1),
                section_id: Some(7),
                user_id: Some(3),
                duration_minutes: None,
            })
        );
    }

    #[test]
    fn missing_identifiers_still_parse() {
        let raw = r#"{"type":"join_document","document_id":4}"#;
        let msg: ReceivedMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind(), "join_document");
        assert_matches!(msg, ReceivedMessage::JoinDocument(PresenceIntent { user_id: None, .. }));
    }

    #[test]
    fn unknown_intent_is_rejected() {
        let raw = r#"{"type":"format_disk"}"#;
        assert!(serde_json::from_str::<ReceivedMessage>(raw).is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = SendMessage::LockDenied(LockDeniedEvent {
            section_id: 7,
            locked_by: 1,
            expires_at: "2026-01-01T12:15:00Z".parse().unwrap(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "lock_denied",
                "section_id": 7,
                "locked_by": 1,
                "expires_at": "2026-01-01T12:15:00Z",
            })
        );
        assert_eq!(
            serde_json::to_value(SendMessage::error("boom")).unwrap(),
            json!({ "type": "error", "message": "boom" })
        );
    }
}
