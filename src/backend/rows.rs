use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{ContentKind, Conversation, DeliveryState, Message, Mood, SenderSummary};

/// Message row as stored by the service. `sender` is the denormalized
/// profile embed; it can be absent on bare change-feed rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub mood: Mood,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sender: Option<SenderSummary>,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id.to_string(),
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: self.kind,
            mood: self.mood,
            created_at: self.created_at,
            sender: self.sender,
            state: DeliveryState::Confirmed,
        }
    }
}

/// Insert payload for the messages table. The server assigns id/created_at.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: ContentKind,
    pub mood: Mood,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRow {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    pub participants: Vec<Uuid>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRow {
    pub fn into_conversation(self) -> Conversation {
        let title = self
            .title
            .unwrap_or_else(|| format!("conversation {}", &self.id.to_string()[..8]));
        Conversation {
            id: self.id,
            title,
            participants: self.participants,
            is_group: self.is_group,
            last_message: self.last_message,
            last_message_at: self.last_message_at.unwrap_or(self.created_at),
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewReaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Away => "away",
            PresenceStatus::Busy => "busy",
            PresenceStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "away" => Ok(PresenceStatus::Away),
            "busy" => Ok(PresenceStatus::Busy),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(format!("unknown presence status: {other}")),
        }
    }
}

/// One current-status record per user, overwritten on every announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRow {
    pub user_id: Uuid,
    pub status: PresenceStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnreadRow {
    pub conversation_id: Uuid,
    pub unread: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_row_parses_with_optional_fields_absent() {
        let json = r#"{
            "id": "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "conversation_id": "1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "sender_id": "2f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "content": "hello",
            "kind": "text",
            "created_at": "2026-08-29T12:00:00Z"
        }"#;
        let row: MessageRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.mood, Mood::Neutral);
        assert!(row.sender.is_none());
        let msg = row.into_message();
        assert_eq!(msg.state, DeliveryState::Confirmed);
        assert_eq!(msg.id, "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f");
    }

    #[test]
    fn conversation_row_falls_back_to_short_id_title() {
        let json = r#"{
            "id": "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "participants": [],
            "created_at": "2026-08-29T12:00:00Z"
        }"#;
        let conv = serde_json::from_str::<ConversationRow>(json)
            .unwrap()
            .into_conversation();
        assert_eq!(conv.title, "conversation 7f8a1f2e");
        // No activity yet; ordering falls back to creation time.
        assert_eq!(
            conv.last_message_at.to_rfc3339(),
            "2026-08-29T12:00:00+00:00"
        );
    }

    #[test]
    fn presence_status_round_trips_lowercase() {
        let row = PresenceRow {
            user_id: Uuid::new_v4(),
            status: PresenceStatus::Away,
            updated_at: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["status"], "away");
        assert_eq!("busy".parse::<PresenceStatus>().unwrap(), PresenceStatus::Busy);
    }
}
