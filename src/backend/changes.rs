use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use super::rows::{MessageRow, PresenceRow};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub const PRESENCE_TOPIC: &str = "presence";

/// Push endpoint derived from the service base URL.
pub fn realtime_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/realtime/v1")
}

pub fn message_topic(conversation_id: Uuid) -> String {
    format!("messages:conversation_id=eq.{conversation_id}")
}

pub fn typing_topic(conversation_id: Uuid) -> String {
    format!("typing:{conversation_id}")
}

/// Ephemeral typing signal carried on the broadcast channel; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingSignal {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub typing: bool,
}

/// Decoded push notification from the change feed.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    MessageInserted(MessageRow),
    MessageUpdated(MessageRow),
    MessageDeleted { conversation_id: Uuid, id: Uuid },
    Typing(TypingSignal),
    PresenceChanged(PresenceRow),
}

#[derive(Debug)]
enum FeedCommand {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Broadcast { topic: String, payload: Value },
}

#[derive(Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum OutboundFrame<'a> {
    Subscribe { topic: &'a str },
    Unsubscribe { topic: &'a str },
    Broadcast { topic: &'a str, payload: &'a Value },
}

#[derive(Deserialize)]
struct InboundFrame {
    topic: String,
    event: String,
    #[serde(default)]
    row: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct MessageKey {
    id: Uuid,
    conversation_id: Uuid,
}

/// Connection to the service's push channel. Subscriptions are topic-scoped
/// and owned by [`SubscriptionHandle`]s; dropping a handle unsubscribes, so a
/// closed conversation view releases its feed no matter which path exits.
pub struct ChangeFeed {
    command_tx: mpsc::UnboundedSender<FeedCommand>,
}

impl ChangeFeed {
    pub fn connect(
        ws_url: String,
        api_key: String,
        token: String,
        event_tx: mpsc::UnboundedSender<FeedEvent>,
        status_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_feed(ws_url, api_key, token, command_rx, event_tx, status_tx));
        Self { command_tx }
    }

    pub fn subscribe(&self, topic: String) -> SubscriptionHandle {
        let _ = self.command_tx.send(FeedCommand::Subscribe {
            topic: topic.clone(),
        });
        SubscriptionHandle {
            topic,
            command_tx: self.command_tx.clone(),
        }
    }

    /// Fire-and-forget transient signal; dropped while disconnected.
    pub fn broadcast(&self, topic: String, payload: Value) {
        let _ = self.command_tx.send(FeedCommand::Broadcast { topic, payload });
    }
}

/// Scoped feed subscription; unsubscribes on drop.
pub struct SubscriptionHandle {
    topic: String,
    command_tx: mpsc::UnboundedSender<FeedCommand>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let _ = self.command_tx.send(FeedCommand::Unsubscribe {
            topic: self.topic.clone(),
        });
    }
}

async fn run_feed(
    ws_url: String,
    api_key: String,
    token: String,
    mut command_rx: mpsc::UnboundedReceiver<FeedCommand>,
    event_tx: mpsc::UnboundedSender<FeedEvent>,
    status_tx: mpsc::UnboundedSender<String>,
) {
    let mut subscriptions: HashSet<String> = HashSet::new();
    let mut announced_loss = false;

    loop {
        let request_url = format!("{ws_url}?apikey={api_key}&token={token}");
        match connect_async(request_url.as_str()).await {
            Ok((socket, _)) => {
                debug!("change feed connected");
                if announced_loss {
                    let _ = status_tx.send("change feed reconnected".to_string());
                    announced_loss = false;
                }

                let (mut sink, mut stream) = socket.split();

                // Replay subscriptions that survived a reconnect.
                let mut healthy = true;
                for topic in &subscriptions {
                    if send_frame(&mut sink, &OutboundFrame::Subscribe { topic }).await.is_err() {
                        healthy = false;
                        break;
                    }
                }

                while healthy {
                    tokio::select! {
                        command = command_rx.recv() => match command {
                            None => return,
                            Some(command) => {
                                if let Err(e) = handle_command(&mut sink, &mut subscriptions, command).await {
                                    warn!("change feed send failed: {e}");
                                    break;
                                }
                            }
                        },
                        frame = stream.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => {
                                if let Some(event) = parse_frame(&text) {
                                    if event_tx.send(event).is_err() {
                                        return;
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Ping(data))) => {
                                if sink.send(WsMessage::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
            Err(e) => {
                warn!("change feed connect failed: {e}");
            }
        }

        if !announced_loss {
            let _ = status_tx.send("change feed disconnected, reconnecting...".to_string());
            announced_loss = true;
        }

        // Keep absorbing subscribe/unsubscribe churn while offline so the
        // replay set is current when the connection comes back.
        if !absorb_commands(&mut command_rx, &mut subscriptions, RECONNECT_DELAY).await {
            return;
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

async fn send_frame(
    sink: &mut WsSink,
    frame: &OutboundFrame<'_>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            debug!("outbound frame serialization failed: {e}");
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(text)).await
}

async fn handle_command(
    sink: &mut WsSink,
    subscriptions: &mut HashSet<String>,
    command: FeedCommand,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match command {
        FeedCommand::Subscribe { topic } => {
            if subscriptions.insert(topic.clone()) {
                send_frame(sink, &OutboundFrame::Subscribe { topic: &topic }).await?;
            }
        }
        FeedCommand::Unsubscribe { topic } => {
            if subscriptions.remove(&topic) {
                send_frame(sink, &OutboundFrame::Unsubscribe { topic: &topic }).await?;
            }
        }
        FeedCommand::Broadcast { topic, payload } => {
            send_frame(
                sink,
                &OutboundFrame::Broadcast {
                    topic: &topic,
                    payload: &payload,
                },
            )
            .await?;
        }
    }
    Ok(())
}

/// Track subscription changes while disconnected. Broadcasts are transient
/// and silently dropped. Returns false when all senders are gone.
async fn absorb_commands(
    command_rx: &mut mpsc::UnboundedReceiver<FeedCommand>,
    subscriptions: &mut HashSet<String>,
    window: Duration,
) -> bool {
    let deadline = Instant::now() + window;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        match tokio::time::timeout(deadline - now, command_rx.recv()).await {
            Ok(Some(FeedCommand::Subscribe { topic })) => {
                subscriptions.insert(topic);
            }
            Ok(Some(FeedCommand::Unsubscribe { topic })) => {
                subscriptions.remove(&topic);
            }
            Ok(Some(FeedCommand::Broadcast { .. })) => {}
            Ok(None) => return false,
            Err(_) => return true,
        }
    }
}

fn parse_frame(text: &str) -> Option<FeedEvent> {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("unparseable feed frame: {e}");
            return None;
        }
    };

    if frame.topic.starts_with("messages:") {
        return match frame.event.as_str() {
            "insert" => serde_json::from_value(frame.row?)
                .ok()
                .map(FeedEvent::MessageInserted),
            "update" => serde_json::from_value(frame.row?)
                .ok()
                .map(FeedEvent::MessageUpdated),
            "delete" => {
                let key: MessageKey = serde_json::from_value(frame.old?).ok()?;
                Some(FeedEvent::MessageDeleted {
                    conversation_id: key.conversation_id,
                    id: key.id,
                })
            }
            _ => None,
        };
    }

    if frame.topic.starts_with("typing:") {
        if frame.event == "broadcast" {
            return serde_json::from_value(frame.payload?).ok().map(FeedEvent::Typing);
        }
        return None;
    }

    if frame.topic == PRESENCE_TOPIC {
        return match frame.event.as_str() {
            "insert" | "update" => serde_json::from_value(frame.row?)
                .ok()
                .map(FeedEvent::PresenceChanged),
            _ => None,
        };
    }

    debug!("feed frame for unknown topic {}", frame.topic);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_insert_frames() {
        let text = r#"{
            "topic": "messages:conversation_id=eq.1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "event": "insert",
            "row": {
                "id": "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
                "conversation_id": "1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
                "sender_id": "2f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
                "content": "hello",
                "kind": "text",
                "mood": "happy",
                "created_at": "2026-08-29T12:00:00Z"
            }
        }"#;
        match parse_frame(text) {
            Some(FeedEvent::MessageInserted(row)) => assert_eq!(row.content, "hello"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_delete_frames_from_the_old_record() {
        let text = r#"{
            "topic": "messages:conversation_id=eq.1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "event": "delete",
            "old": {
                "id": "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
                "conversation_id": "1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f"
            }
        }"#;
        match parse_frame(text) {
            Some(FeedEvent::MessageDeleted { id, .. }) => {
                assert_eq!(id.to_string(), "7f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_typing_broadcasts() {
        let text = r#"{
            "topic": "typing:1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
            "event": "broadcast",
            "payload": {
                "conversation_id": "1f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
                "user_id": "2f8a1f2e-8f2c-4a6b-9a01-2e4b5c6d7e8f",
                "name": "alice",
                "typing": true
            }
        }"#;
        match parse_frame(text) {
            Some(FeedEvent::Typing(signal)) => {
                assert!(signal.typing);
                assert_eq!(signal.name, "alice");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn ignores_malformed_and_unknown_frames() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"topic":"messages:x","event":"insert"}"#).is_none());
        assert!(parse_frame(r#"{"topic":"reactions","event":"insert","row":{}}"#).is_none());
    }

    #[test]
    fn realtime_url_swaps_scheme_and_appends_path() {
        assert_eq!(
            realtime_url("https://rows.example.com/"),
            "wss://rows.example.com/realtime/v1"
        );
        assert_eq!(
            realtime_url("http://localhost:54321"),
            "ws://localhost:54321/realtime/v1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn offline_churn_updates_the_replay_set() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut subscriptions = HashSet::new();
        subscriptions.insert("messages:a".to_string());

        tx.send(FeedCommand::Subscribe {
            topic: "typing:a".to_string(),
        })
        .unwrap();
        tx.send(FeedCommand::Unsubscribe {
            topic: "messages:a".to_string(),
        })
        .unwrap();
        // Transient signals are dropped while disconnected.
        tx.send(FeedCommand::Broadcast {
            topic: "typing:a".to_string(),
            payload: serde_json::json!({"typing": true}),
        })
        .unwrap();

        assert!(absorb_commands(&mut rx, &mut subscriptions, RECONNECT_DELAY).await);
        assert!(subscriptions.contains("typing:a"));
        assert!(!subscriptions.contains("messages:a"));
        assert_eq!(subscriptions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn absorb_ends_when_every_handle_is_gone() {
        let (tx, mut rx) = mpsc::unbounded_channel::<FeedCommand>();
        let mut subscriptions = HashSet::<String>::new();
        drop(tx);
        assert!(!absorb_commands(&mut rx, &mut subscriptions, RECONNECT_DELAY).await);
    }

    #[test]
    fn outbound_frames_are_tagged_by_action() {
        let frame = OutboundFrame::Subscribe { topic: "presence" };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["action"], "subscribe");
        assert_eq!(json["topic"], "presence");
    }
}
