use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identifier prefix marking a locally-created, not-yet-confirmed message.
pub const PROVISIONAL_ID_PREFIX: &str = "temp-";

pub const FAILED_MARKER: &str = "❌ Failed to send: ";
pub const PERMANENTLY_FAILED_MARKER: &str = "💀 Failed permanently: ";
pub const REJECTED_MARKER: &str = "🚫 Rejected: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Angry,
    Anxious,
    #[default]
    Neutral,
}

/// Where a message sits in the send lifecycle. Remote-origin messages are
/// always `Confirmed`; everything else only applies to our own sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Provisional,
    Confirmed,
    Failed,
    PermanentlyFailed,
    /// The service refused the write (authorization or validation); never
    /// retried automatically, only by explicit re-submission.
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderSummary {
    pub name: String,
    pub handle: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: ContentKind,
    pub mood: Mood,
    pub created_at: DateTime<Utc>,
    pub sender: Option<SenderSummary>,
    pub state: DeliveryState,
}

impl Message {
    pub fn provisional(
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
        kind: ContentKind,
        mood: Mood,
        sender: Option<SenderSummary>,
    ) -> Self {
        Self {
            id: next_provisional_id(),
            conversation_id,
            sender_id,
            content: content.trim().to_string(),
            kind,
            mood,
            created_at: Utc::now(),
            sender,
            state: DeliveryState::Provisional,
        }
    }

    /// True for any entry still eligible for reconciliation against a
    /// server-confirmed counterpart.
    pub fn is_unconfirmed(&self) -> bool {
        self.state != DeliveryState::Confirmed
    }

    pub fn sender_name(&self) -> &str {
        self.sender.as_ref().map(|s| s.name.as_str()).unwrap_or("?")
    }

    /// Content as shown in the message list. The stored content stays
    /// unprefixed so retries re-send the original text.
    pub fn display_content(&self) -> String {
        match self.state {
            DeliveryState::Provisional | DeliveryState::Confirmed => self.content.clone(),
            DeliveryState::Failed => format!("{}{}", FAILED_MARKER, self.content),
            DeliveryState::PermanentlyFailed => {
                format!("{}{}", PERMANENTLY_FAILED_MARKER, self.content)
            }
            DeliveryState::Rejected => format!("{}{}", REJECTED_MARKER, self.content),
        }
    }
}

/// Time-ordered locally-unique token. Zero-padded millis keep lexicographic
/// order equal to creation order; the counter breaks same-millisecond ties.
pub fn next_provisional_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!(
        "{}{:013}-{:06}",
        PROVISIONAL_ID_PREFIX,
        Utc::now().timestamp_millis(),
        seq
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisional(content: &str) -> Message {
        Message::provisional(
            Uuid::new_v4(),
            Uuid::new_v4(),
            content,
            ContentKind::Text,
            Mood::Neutral,
            None,
        )
    }

    #[test]
    fn provisional_ids_are_prefixed_and_time_ordered() {
        let a = next_provisional_id();
        let b = next_provisional_id();
        assert!(a.starts_with(PROVISIONAL_ID_PREFIX));
        assert!(b.starts_with(PROVISIONAL_ID_PREFIX));
        assert!(a < b);
    }

    #[test]
    fn display_content_carries_failure_markers() {
        let mut msg = provisional("hello");
        assert_eq!(msg.display_content(), "hello");

        msg.state = DeliveryState::Failed;
        assert_eq!(msg.display_content(), "❌ Failed to send: hello");

        msg.state = DeliveryState::PermanentlyFailed;
        assert_eq!(msg.display_content(), "💀 Failed permanently: hello");

        msg.state = DeliveryState::Rejected;
        assert_eq!(msg.display_content(), "🚫 Rejected: hello");

        // Underlying content is never rewritten.
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn provisional_trims_content() {
        let msg = provisional("  hi there \n");
        assert_eq!(msg.content, "hi there");
        assert_eq!(msg.state, DeliveryState::Provisional);
    }

    #[test]
    fn kind_and_mood_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ContentKind::Ai).unwrap(), "\"ai\"");
        assert_eq!(serde_json::to_string(&Mood::Anxious).unwrap(), "\"anxious\"");
    }
}
