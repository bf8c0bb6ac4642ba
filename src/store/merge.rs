use super::message::{DeliveryState, Message};

/// One step of the message-list state machine. Remote variants come from the
/// change feed; `Send*` variants are the outcomes of our own create requests.
/// Inbound feed events and direct request replies can race, so every arm is
/// written to be idempotent.
#[derive(Debug, Clone)]
pub enum MergeEvent {
    RemoteInsert(Message),
    RemoteUpdate(Message),
    RemoteDelete(String),
    SendSucceeded {
        provisional_id: String,
        confirmed: Message,
    },
    SendFailed {
        provisional_id: String,
    },
    SendFailedPermanently {
        provisional_id: String,
    },
    SendRejected {
        provisional_id: String,
    },
}

/// Merge one event into the visible list. All mutations of a conversation's
/// message list go through here, serialized by the event loop.
pub fn apply(messages: &mut Vec<Message>, event: MergeEvent) {
    match event {
        MergeEvent::RemoteInsert(mut incoming) => {
            incoming.state = DeliveryState::Confirmed;
            // A push for our own insert must not duplicate the provisional
            // entry: reconcile by (sender, content) against anything not yet
            // confirmed, preserving list position.
            if let Some(i) = messages.iter().position(|m| {
                m.is_unconfirmed()
                    && m.sender_id == incoming.sender_id
                    && m.content.trim() == incoming.content.trim()
            }) {
                replace_keeping_sender(messages, i, incoming);
                return;
            }
            if messages.iter().any(|m| m.id == incoming.id) {
                return;
            }
            insert_ordered(messages, incoming);
        }
        MergeEvent::RemoteUpdate(mut incoming) => {
            incoming.state = DeliveryState::Confirmed;
            // Out-of-window updates are ignored.
            if let Some(i) = messages.iter().position(|m| m.id == incoming.id) {
                replace_keeping_sender(messages, i, incoming);
            }
        }
        MergeEvent::RemoteDelete(id) => {
            messages.retain(|m| m.id != id);
        }
        MergeEvent::SendSucceeded {
            provisional_id,
            mut confirmed,
        } => {
            confirmed.state = DeliveryState::Confirmed;
            if let Some(i) = messages.iter().position(|m| m.id == provisional_id) {
                replace_keeping_sender(messages, i, confirmed);
                return;
            }
            // The feed notification may have reconciled this send already.
            if messages.iter().any(|m| m.id == confirmed.id) {
                return;
            }
            insert_ordered(messages, confirmed);
        }
        MergeEvent::SendFailed { provisional_id } => {
            mark(messages, &provisional_id, DeliveryState::Failed);
        }
        MergeEvent::SendFailedPermanently { provisional_id } => {
            mark(messages, &provisional_id, DeliveryState::PermanentlyFailed);
        }
        MergeEvent::SendRejected { provisional_id } => {
            mark(messages, &provisional_id, DeliveryState::Rejected);
        }
    }
}

/// Replace in place. Bare change-feed rows carry no sender embed; an
/// already-denormalized sender on the outgoing entry survives the swap.
fn replace_keeping_sender(messages: &mut [Message], i: usize, mut incoming: Message) {
    if incoming.sender.is_none() {
        incoming.sender = messages[i].sender.take();
    }
    messages[i] = incoming;
}

fn mark(messages: &mut [Message], provisional_id: &str, state: DeliveryState) {
    if let Some(m) = messages
        .iter_mut()
        .find(|m| m.id == provisional_id && m.is_unconfirmed())
    {
        m.state = state;
    }
}

/// Insert in creation-time order. Most arrivals are already newest, so append
/// is the fast path; out-of-order arrivals fall back to binary search.
fn insert_ordered(messages: &mut Vec<Message>, message: Message) {
    if messages
        .last()
        .map_or(true, |last| last.created_at <= message.created_at)
    {
        messages.push(message);
    } else {
        let pos = messages
            .binary_search_by(|existing| existing.created_at.cmp(&message.created_at))
            .unwrap_or_else(|e| e);
        messages.insert(pos, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::message::{ContentKind, Mood};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn provisional(sender: Uuid, content: &str) -> Message {
        Message::provisional(
            Uuid::new_v4(),
            sender,
            content,
            ContentKind::Text,
            Mood::Neutral,
            None,
        )
    }

    fn confirmed(id: &str, sender: Uuid, content: &str, offset_ms: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: Uuid::new_v4(),
            sender_id: sender,
            content: content.to_string(),
            kind: ContentKind::Text,
            mood: Mood::Neutral,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
            sender: None,
            state: DeliveryState::Confirmed,
        }
    }

    #[test]
    fn successful_send_replaces_provisional_in_place() {
        let sender = Uuid::new_v4();
        let mut list = vec![confirmed("m0", sender, "earlier", -10)];
        let pending = provisional(sender, "hello");
        let pid = pending.id.clone();
        list.push(pending);

        apply(
            &mut list,
            MergeEvent::SendSucceeded {
                provisional_id: pid,
                confirmed: confirmed("m1", sender, "hello", 0),
            },
        );

        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, "m1");
        assert_eq!(list[1].content, "hello");
        assert_eq!(list[1].state, DeliveryState::Confirmed);
    }

    #[test]
    fn own_insert_notification_does_not_duplicate_provisional() {
        let sender = Uuid::new_v4();
        let pending = provisional(sender, "hello");
        let pid = pending.id.clone();
        let mut list = vec![pending];

        // Feed push arrives before the direct reply.
        apply(
            &mut list,
            MergeEvent::RemoteInsert(confirmed("m1", sender, "hello", 0)),
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "m1");

        // Then the direct reply lands: already reconciled, nothing changes.
        apply(
            &mut list,
            MergeEvent::SendSucceeded {
                provisional_id: pid,
                confirmed: confirmed("m1", sender, "hello", 0),
            },
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "m1");
    }

    #[test]
    fn remote_insert_is_idempotent_by_identifier() {
        let sender = Uuid::new_v4();
        let mut list = Vec::new();
        apply(
            &mut list,
            MergeEvent::RemoteInsert(confirmed("m1", sender, "hi", 0)),
        );
        apply(
            &mut list,
            MergeEvent::RemoteInsert(confirmed("m1", sender, "hi", 0)),
        );
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn inserts_sort_ascending_regardless_of_arrival_order() {
        let sender = Uuid::new_v4();
        let mut list = Vec::new();
        for offset in [30i64, 10, 50, 20, 40] {
            apply(
                &mut list,
                MergeEvent::RemoteInsert(confirmed(
                    &format!("m{offset}"),
                    sender,
                    &format!("msg {offset}"),
                    offset,
                )),
            );
        }
        let times: Vec<_> = list.iter().map(|m| m.created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn update_replaces_by_identifier_preserving_position() {
        let sender = Uuid::new_v4();
        let mut list = vec![
            confirmed("m1", sender, "one", 0),
            confirmed("m2", sender, "two", 10),
        ];
        apply(
            &mut list,
            MergeEvent::RemoteUpdate(confirmed("m1", sender, "one (edited)", 0)),
        );
        assert_eq!(list[0].content, "one (edited)");
        assert_eq!(list[1].content, "two");

        // Out-of-window update is a no-op.
        apply(
            &mut list,
            MergeEvent::RemoteUpdate(confirmed("m9", sender, "ghost", 0)),
        );
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn delete_removes_by_identifier() {
        let sender = Uuid::new_v4();
        let mut list = vec![confirmed("m1", sender, "one", 0)];
        apply(&mut list, MergeEvent::RemoteDelete("m1".to_string()));
        assert!(list.is_empty());
        // Absent identifier is a no-op.
        apply(&mut list, MergeEvent::RemoteDelete("m1".to_string()));
        assert!(list.is_empty());
    }

    #[test]
    fn failed_then_retried_send_ends_with_server_row() {
        let sender = Uuid::new_v4();
        let pending = provisional(sender, "hello");
        let pid = pending.id.clone();
        let mut list = vec![pending];

        apply(
            &mut list,
            MergeEvent::SendFailed {
                provisional_id: pid.clone(),
            },
        );
        assert_eq!(list[0].state, DeliveryState::Failed);
        assert_eq!(list[0].display_content(), "❌ Failed to send: hello");

        apply(
            &mut list,
            MergeEvent::SendSucceeded {
                provisional_id: pid,
                confirmed: confirmed("m1", sender, "hello", 0),
            },
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "m1");
        assert_eq!(list[0].display_content(), "hello");
    }

    #[test]
    fn exhausted_retry_marks_permanent_failure() {
        let sender = Uuid::new_v4();
        let pending = provisional(sender, "hello");
        let pid = pending.id.clone();
        let mut list = vec![pending];

        apply(
            &mut list,
            MergeEvent::SendFailed {
                provisional_id: pid.clone(),
            },
        );
        apply(
            &mut list,
            MergeEvent::SendFailedPermanently {
                provisional_id: pid,
            },
        );
        assert_eq!(list[0].state, DeliveryState::PermanentlyFailed);
        assert_eq!(
            list[0].display_content(),
            "💀 Failed permanently: hello"
        );
    }

    #[test]
    fn rejected_send_is_marked_distinctly() {
        let sender = Uuid::new_v4();
        let pending = provisional(sender, "hello");
        let pid = pending.id.clone();
        let mut list = vec![pending];

        apply(&mut list, MergeEvent::SendRejected { provisional_id: pid });
        assert_eq!(list[0].state, DeliveryState::Rejected);
        assert_eq!(list[0].display_content(), "🚫 Rejected: hello");
        assert_eq!(list[0].content, "hello");
    }

    #[test]
    fn bare_update_keeps_denormalized_sender() {
        let sender = Uuid::new_v4();
        let mut seen = confirmed("m1", sender, "one", 0);
        seen.sender = Some(crate::store::SenderSummary {
            name: "Alice".to_string(),
            handle: "alice".to_string(),
            avatar_url: None,
        });
        let mut list = vec![seen];

        // Change-feed update rows arrive without the sender embed.
        apply(
            &mut list,
            MergeEvent::RemoteUpdate(confirmed("m1", sender, "one (edited)", 0)),
        );
        assert_eq!(list[0].content, "one (edited)");
        assert_eq!(list[0].sender_name(), "Alice");
    }

    #[test]
    fn reconcile_keeps_provisional_sender_when_push_is_bare() {
        let sender = Uuid::new_v4();
        let mut pending = provisional(sender, "hello");
        pending.sender = Some(crate::store::SenderSummary {
            name: "Alice".to_string(),
            handle: "alice".to_string(),
            avatar_url: None,
        });
        let mut list = vec![pending];

        apply(
            &mut list,
            MergeEvent::RemoteInsert(confirmed("m1", sender, "hello", 0)),
        );
        assert_eq!(list[0].id, "m1");
        assert_eq!(list[0].sender_name(), "Alice");
    }

    #[test]
    fn concurrent_submits_stay_independent() {
        let sender = Uuid::new_v4();
        let first = provisional(sender, "one");
        let second = provisional(sender, "two");
        let first_id = first.id.clone();
        let mut list = vec![first, second];

        apply(
            &mut list,
            MergeEvent::SendSucceeded {
                provisional_id: first_id,
                confirmed: confirmed("m1", sender, "one", 0),
            },
        );
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "m1");
        assert_eq!(list[1].state, DeliveryState::Provisional);
        assert_eq!(list[1].content, "two");
    }

    #[test]
    fn failed_entry_still_reconciles_against_late_feed_insert() {
        // First attempt timed out client-side but actually landed; the feed
        // push for it must claim the failed entry rather than duplicate it.
        let sender = Uuid::new_v4();
        let pending = provisional(sender, "hello");
        let pid = pending.id.clone();
        let mut list = vec![pending];

        apply(&mut list, MergeEvent::SendFailed { provisional_id: pid });
        apply(
            &mut list,
            MergeEvent::RemoteInsert(confirmed("m1", sender, "hello", 0)),
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "m1");
        assert_eq!(list[0].state, DeliveryState::Confirmed);
    }
}
