use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

pub use merge::MergeEvent;
pub use message::{ContentKind, DeliveryState, Message, Mood, SenderSummary};
pub use typing::{TypingSet, TypingThrottle};

pub mod merge;
mod message;
mod typing;

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub participants: Vec<Uuid>,
    pub is_group: bool,
    pub last_message: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn apply(&mut self, event: MergeEvent) {
        merge::apply(&mut self.messages, event);
    }

    /// Refresh the denormalized preview used for list ordering.
    pub fn touch(&mut self, preview: &str, at: DateTime<Utc>) {
        self.last_message = Some(preview.to_string());
        if at > self.last_message_at {
            self.last_message_at = at;
        }
    }
}

/// Sender profiles seen so far, keyed by user. Bare change-feed rows carry no
/// sender embed; the cache fills them in without a round trip.
#[derive(Debug, Default)]
pub struct ProfileCache {
    profiles: HashMap<Uuid, SenderSummary>,
}

impl ProfileCache {
    pub fn remember(&mut self, user_id: Uuid, summary: &SenderSummary) {
        self.profiles.insert(user_id, summary.clone());
    }

    /// Fill a missing sender embed from the cache. Returns false when the
    /// sender is still unknown and a lookup is needed.
    pub fn fill(&self, message: &mut Message) -> bool {
        if message.sender.is_some() {
            return true;
        }
        match self.profiles.get(&message.sender_id) {
            Some(summary) => {
                message.sender = Some(summary.clone());
                true
            }
            None => false,
        }
    }
}

/// In-memory conversation state. Message lists are only held for the
/// currently open conversation; closing the view discards them.
pub struct ConversationStore {
    conversations: HashMap<Uuid, Conversation>,
    open: Option<Uuid>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: HashMap::new(),
            open: None,
        }
    }

    /// Insert or refresh conversation metadata, keeping any loaded messages.
    pub fn upsert(&mut self, incoming: Conversation) {
        if let Some(existing) = self.conversations.get_mut(&incoming.id) {
            existing.title = incoming.title;
            existing.participants = incoming.participants;
            existing.is_group = incoming.is_group;
            if incoming.last_message_at >= existing.last_message_at {
                existing.last_message = incoming.last_message;
                existing.last_message_at = incoming.last_message_at;
            }
        } else {
            self.conversations.insert(incoming.id, incoming);
        }
    }

    pub fn open(&mut self, id: Uuid) -> bool {
        if !self.conversations.contains_key(&id) {
            return false;
        }
        self.close();
        self.open = Some(id);
        true
    }

    pub fn close(&mut self) {
        if let Some(id) = self.open.take() {
            if let Some(conversation) = self.conversations.get_mut(&id) {
                conversation.messages.clear();
            }
        }
    }

    pub fn open_id(&self) -> Option<Uuid> {
        self.open
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.open.and_then(|id| self.conversations.get(&id))
    }

    pub fn current_mut(&mut self) -> Option<&mut Conversation> {
        let id = self.open?;
        self.conversations.get_mut(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// Replace the backfilled history for the open conversation. Ignored when
    /// the view has moved on (stale response from a superseded selection).
    pub fn set_messages(&mut self, conversation_id: Uuid, messages: Vec<Message>) -> bool {
        if self.open != Some(conversation_id) {
            return false;
        }
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.messages = messages;
            return true;
        }
        false
    }

    /// Merge an event only if it targets the currently open conversation.
    /// Everything else is a stale or out-of-scope response and is discarded.
    pub fn apply_if_open(&mut self, conversation_id: Uuid, event: MergeEvent) -> bool {
        if self.open != Some(conversation_id) {
            return false;
        }
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.apply(event);
            return true;
        }
        false
    }

    pub fn touch(&mut self, conversation_id: Uuid, preview: &str, at: DateTime<Utc>) {
        if let Some(conversation) = self.conversations.get_mut(&conversation_id) {
            conversation.touch(preview, at);
        }
    }

    /// Conversations for the list view, most recent activity first.
    pub fn ordered(&self) -> Vec<&Conversation> {
        let mut conversations: Vec<&Conversation> = self.conversations.values().collect();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }
}
