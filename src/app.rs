use anyhow::Result;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    message_topic, realtime_url, retry, typing_topic, BackendClient, ChangeFeed, FeedEvent,
    NewMessage, NewReaction, PresenceStatus, PresenceTracker, Session, SubscriptionHandle,
    TypingSignal, PRESENCE_TOPIC,
};
use crate::config::Settings;
use crate::store::{
    ContentKind, ConversationStore, DeliveryState, MergeEvent, Message, Mood, ProfileCache,
    TypingSet, TypingThrottle,
};

/// Outcome of an asynchronous send task, tagged with the conversation it
/// belongs to so stale results can be discarded after a view switch.
struct SendOutcome {
    conversation_id: Uuid,
    event: MergeEvent,
}

pub struct App {
    pub should_quit: bool,
    session: Session,
    client: BackendClient,
    feed: ChangeFeed,
    presence: PresenceTracker,

    store: ConversationStore,
    profiles: ProfileCache,
    typing_out: TypingThrottle,
    typing_in: TypingSet,
    roster: HashMap<Uuid, PresenceStatus>,
    mood: Mood,
    last_indicator: Option<String>,
    status_messages: Vec<String>,

    // Receivers drained on each tick
    feed_rx: mpsc::UnboundedReceiver<FeedEvent>,
    send_rx: mpsc::UnboundedReceiver<SendOutcome>,
    status_rx: mpsc::UnboundedReceiver<String>,
    send_tx: mpsc::UnboundedSender<SendOutcome>,
    status_tx: mpsc::UnboundedSender<String>,

    // Held subscriptions; dropping a handle unsubscribes
    message_sub: Option<SubscriptionHandle>,
    typing_sub: Option<SubscriptionHandle>,
    _presence_sub: SubscriptionHandle,
}

impl App {
    pub fn new(settings: Settings) -> Result<Self> {
        let session = match settings.user_id {
            Some(user_id) => Session::new(
                user_id,
                &settings.token,
                settings.name.as_deref(),
                settings.handle.as_deref(),
            ),
            None => Session::guest(),
        };

        let client = BackendClient::new(&settings.url, &settings.api_key, &session.token)?;

        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let feed = ChangeFeed::connect(
            realtime_url(&settings.url),
            settings.api_key.clone(),
            session.token.clone(),
            feed_tx,
            status_tx.clone(),
        );
        let presence_sub = feed.subscribe(PRESENCE_TOPIC.to_string());
        let presence = PresenceTracker::new(client.clone(), session.user_id, status_tx.clone());

        let mut app = Self {
            should_quit: false,
            session,
            client,
            feed,
            presence,

            store: ConversationStore::new(),
            profiles: ProfileCache::default(),
            typing_out: TypingThrottle::default(),
            typing_in: TypingSet::default(),
            roster: HashMap::new(),
            mood: Mood::Neutral,
            last_indicator: None,
            status_messages: Vec::new(),

            feed_rx,
            send_rx,
            status_rx,
            send_tx,
            status_tx,

            message_sub: None,
            typing_sub: None,
            _presence_sub: presence_sub,
        };

        let own_summary = app.session.summary();
        app.profiles.remember(app.session.user_id, &own_summary);

        app.add_status_message(format!(
            "tidechat v0.4.0 - {} ({})",
            app.session.name,
            if app.session.is_authenticated() {
                "signed in"
            } else {
                "guest, writes will be rejected"
            }
        ));
        app.presence.announce(PresenceStatus::Online);
        Ok(app)
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<()> {
        let input = line.trim();
        if input.is_empty() {
            return Ok(());
        }

        if let Some(command) = input.strip_prefix('/') {
            self.handle_command(command).await?;
        } else {
            self.composing(Instant::now());
            self.submit(input, ContentKind::Text, self.mood);
        }
        Ok(())
    }

    async fn handle_command(&mut self, input: &str) -> Result<()> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(());
        }

        match parts[0].to_lowercase().as_str() {
            "open" | "o" => {
                if parts.len() != 2 {
                    self.add_status_message("Usage: /open <index|uuid>".to_string());
                    return Ok(());
                }
                self.open_conversation(parts[1]).await?;
            }
            "close" => {
                self.close_conversation();
            }
            "list" | "ls" => {
                self.list_conversations().await;
            }
            "mood" => {
                if parts.len() != 2 {
                    self.add_status_message(
                        "Usage: /mood <happy|sad|angry|anxious|neutral>".to_string(),
                    );
                    return Ok(());
                }
                self.set_mood(parts[1]);
            }
            "image" => {
                if parts.len() < 2 {
                    self.add_status_message("Usage: /image <url>".to_string());
                    return Ok(());
                }
                let content = parts[1..].join(" ");
                self.submit(&content, ContentKind::Image, self.mood);
            }
            "react" => {
                if parts.len() != 3 {
                    self.add_status_message("Usage: /react <index> <emoji>".to_string());
                    return Ok(());
                }
                self.react(parts[1], parts[2]);
            }
            "edit" => {
                if parts.len() < 3 {
                    self.add_status_message("Usage: /edit <index> <new text>".to_string());
                    return Ok(());
                }
                let content = parts[2..].join(" ");
                self.edit(parts[1], &content);
            }
            "resend" => {
                if parts.len() != 2 {
                    self.add_status_message("Usage: /resend <index>".to_string());
                    return Ok(());
                }
                self.resend(parts[1]);
            }
            "read" => {
                self.mark_read();
            }
            "unread" => {
                self.show_unread();
            }
            "search" | "s" => {
                if parts.len() < 2 {
                    self.add_status_message("Usage: /search <query>".to_string());
                    return Ok(());
                }
                let query = parts[1..].join(" ");
                self.search(&query);
            }
            "status" => {
                if parts.len() != 2 {
                    self.add_status_message(
                        "Usage: /status <online|away|busy|offline>".to_string(),
                    );
                    return Ok(());
                }
                self.set_presence(parts[1]);
            }
            "who" => {
                self.show_roster();
            }
            "help" | "h" | "commands" => {
                self.show_help();
            }
            "quit" | "q" | "exit" => {
                self.should_quit = true;
            }
            _ => {
                self.add_status_message(format!(
                    "Unknown command: {}. Type /help for available commands.",
                    parts[0]
                ));
            }
        }

        Ok(())
    }

    async fn open_conversation(&mut self, arg: &str) -> Result<()> {
        // Resolve unknown ids against a fresh conversation list.
        if self.resolve_conversation(arg).is_none() {
            self.refresh_conversations().await;
        }
        let Some(id) = self.resolve_conversation(arg) else {
            self.add_status_message(format!("Unknown conversation: {arg}"));
            return Ok(());
        };

        self.close_conversation();
        if !self.store.open(id) {
            return Ok(());
        }

        // Subscribe before the backfill so nothing lands in the gap; the
        // merge dedupes any overlap.
        self.message_sub = Some(self.feed.subscribe(message_topic(id)));
        self.typing_sub = Some(self.feed.subscribe(typing_topic(id)));

        let title = self
            .store
            .get(id)
            .map(|c| c.title.clone())
            .unwrap_or_default();
        self.add_status_message(format!("Opened {title}"));

        match self.client.fetch_messages(id).await {
            Ok(rows) => {
                let messages: Vec<Message> = rows
                    .into_iter()
                    .filter(|row| row.deleted_at.is_none())
                    .map(|row| row.into_message())
                    .collect();
                for message in &messages {
                    self.remember_sender(message);
                }
                if self.store.set_messages(id, messages) {
                    if let Some(conversation) = self.store.get(id) {
                        for message in &conversation.messages {
                            print_message(message);
                        }
                    }
                }
            }
            Err(e) => {
                self.add_status_message(format!("Failed to load history: {e}"));
            }
        }

        // Viewing the conversation clears its unread state.
        let client = self.client.clone();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = client.mark_conversation_read(id).await {
                let _ = status_tx.send(format!("mark-as-read failed: {e}"));
            }
        });
        Ok(())
    }

    fn close_conversation(&mut self) {
        if self.typing_out.reset() {
            if let Some(id) = self.store.open_id() {
                self.broadcast_typing(id, false);
            }
        }
        self.message_sub = None;
        self.typing_sub = None;
        self.typing_in.clear();
        self.last_indicator = None;
        self.store.close();
    }

    fn resolve_conversation(&self, arg: &str) -> Option<Uuid> {
        if let Ok(id) = arg.parse::<Uuid>() {
            return self.store.get(id).map(|c| c.id);
        }
        let index: usize = arg.parse().ok()?;
        self.store.ordered().get(index.checked_sub(1)?).map(|c| c.id)
    }

    async fn refresh_conversations(&mut self) {
        match self.client.fetch_conversations(self.session.user_id).await {
            Ok(rows) => {
                for row in rows {
                    self.store.upsert(row.into_conversation());
                }
            }
            Err(e) => {
                self.add_status_message(format!("Failed to fetch conversations: {e}"));
            }
        }
    }

    async fn list_conversations(&mut self) {
        self.refresh_conversations().await;
        if self.store.len() == 0 {
            self.add_status_message("No conversations".to_string());
            return;
        }
        let open = self.store.open_id();
        let lines: Vec<String> = self
            .store
            .ordered()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let marker = if Some(c.id) == open { "*" } else { " " };
                let preview = c.last_message.as_deref().unwrap_or("");
                let kind = if c.is_group { "group" } else { "direct" };
                format!("{}{}. {} [{}] {}", marker, i + 1, c.title, kind, preview)
            })
            .collect();
        for line in lines {
            self.add_status_message(line);
        }
    }

    /// Optimistic submit: the provisional entry is visible before the create
    /// request leaves the process.
    fn submit(&mut self, content: &str, kind: ContentKind, mood: Mood) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let Some(conversation_id) = self.store.open_id() else {
            self.add_status_message(
                "No open conversation. Use /list then /open <index>.".to_string(),
            );
            return;
        };
        if !self.session.is_authenticated() {
            self.add_status_message("Cannot send as guest: no access token.".to_string());
            return;
        }

        let message = Message::provisional(
            conversation_id,
            self.session.user_id,
            content,
            kind,
            mood,
            Some(self.session.summary()),
        );
        let provisional_id = message.id.clone();
        self.store
            .touch(conversation_id, &message.content, message.created_at);
        print_message(&message);

        let request = NewMessage {
            conversation_id,
            sender_id: self.session.user_id,
            content: message.content.clone(),
            kind,
            mood,
        };
        if let Some(conversation) = self.store.current_mut() {
            // Appended at submission time, so it already sorts last.
            conversation.messages.push(message);
        }
        self.spawn_send(provisional_id, request);
    }

    fn spawn_send(&self, provisional_id: String, request: NewMessage) {
        let client = self.client.clone();
        let send_tx = self.send_tx.clone();
        let status_tx = self.status_tx.clone();
        let conversation_id = request.conversation_id;

        tokio::spawn(async move {
            let retry_tx = send_tx.clone();
            let retry_status = status_tx.clone();
            let retry_pid = provisional_id.clone();
            let op_client = client.clone();
            let op_request = request.clone();

            let result = retry::with_retry(
                move || {
                    let client = op_client.clone();
                    let request = op_request.clone();
                    async move { client.insert_message(&request).await }
                },
                move |err| {
                    let _ = retry_tx.send(SendOutcome {
                        conversation_id,
                        event: MergeEvent::SendFailed {
                            provisional_id: retry_pid.clone(),
                        },
                    });
                    let _ = retry_status.send(format!(
                        "send failed ({err}), retrying in {}s",
                        retry::RETRY_DELAY.as_secs()
                    ));
                },
            )
            .await;

            match result {
                Ok(row) => {
                    let _ = send_tx.send(SendOutcome {
                        conversation_id,
                        event: MergeEvent::SendSucceeded {
                            provisional_id,
                            confirmed: row.into_message(),
                        },
                    });
                }
                Err(err) => {
                    // Connectivity exhausted its retry; anything else was
                    // refused outright and gets the distinct rejected mark.
                    let event = if err.is_retryable() {
                        MergeEvent::SendFailedPermanently { provisional_id }
                    } else {
                        let _ = status_tx.send(format!("send rejected: {err}"));
                        MergeEvent::SendRejected { provisional_id }
                    };
                    let _ = send_tx.send(SendOutcome {
                        conversation_id,
                        event,
                    });
                }
            }
        });
    }

    fn resend(&mut self, index: &str) {
        let (content, kind, mood) = {
            let Some(conversation) = self.store.current_mut() else {
                self.add_status_message("No open conversation.".to_string());
                return;
            };
            let position = match index
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .filter(|&i| i < conversation.messages.len())
            {
                Some(position) => position,
                None => {
                    self.add_status_message(format!("No message at index {index}"));
                    return;
                }
            };
            if !matches!(
                conversation.messages[position].state,
                DeliveryState::PermanentlyFailed | DeliveryState::Rejected
            ) {
                self.add_status_message("Only failed messages can be resent.".to_string());
                return;
            }
            let failed = conversation.messages.remove(position);
            (failed.content, failed.kind, failed.mood)
        };
        self.submit(&content, kind, mood);
    }

    fn react(&mut self, index: &str, emoji: &str) {
        let Some(message) = self.message_at(index) else {
            self.add_status_message(format!("No message at index {index}"));
            return;
        };
        let Ok(message_id) = message.id.parse::<Uuid>() else {
            self.add_status_message("Message is not confirmed yet.".to_string());
            return;
        };
        let request = NewReaction {
            message_id,
            user_id: self.session.user_id,
            emoji: emoji.to_string(),
        };
        let client = self.client.clone();
        let status_tx = self.status_tx.clone();
        let emoji = emoji.to_string();
        tokio::spawn(async move {
            match client.add_reaction(&request).await {
                Ok(_) => {
                    let _ = status_tx.send(format!("Reacted {emoji}"));
                }
                Err(e) => {
                    let _ = status_tx.send(format!("Reaction failed: {e}"));
                }
            }
        });
    }

    fn edit(&mut self, index: &str, content: &str) {
        let Some(message) = self.message_at(index) else {
            self.add_status_message(format!("No message at index {index}"));
            return;
        };
        if message.sender_id != self.session.user_id {
            self.add_status_message("Only your own messages can be edited.".to_string());
            return;
        }
        let Ok(message_id) = message.id.parse::<Uuid>() else {
            self.add_status_message("Message is not confirmed yet.".to_string());
            return;
        };
        let conversation_id = message.conversation_id;
        let client = self.client.clone();
        let send_tx = self.send_tx.clone();
        let status_tx = self.status_tx.clone();
        let content = content.to_string();
        tokio::spawn(async move {
            match client.update_message(message_id, &content).await {
                Ok(row) => {
                    // Same merge path as a feed update; idempotent if the
                    // feed notification also arrives.
                    let _ = send_tx.send(SendOutcome {
                        conversation_id,
                        event: MergeEvent::RemoteUpdate(row.into_message()),
                    });
                }
                Err(e) => {
                    let _ = status_tx.send(format!("Edit failed: {e}"));
                }
            }
        });
    }

    fn message_at(&self, index: &str) -> Option<&Message> {
        let conversation = self.store.current()?;
        let position = index.parse::<usize>().ok()?.checked_sub(1)?;
        conversation.messages.get(position)
    }

    fn mark_read(&mut self) {
        let Some(id) = self.store.open_id() else {
            self.add_status_message("No open conversation.".to_string());
            return;
        };
        let client = self.client.clone();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            match client.mark_conversation_read(id).await {
                Ok(()) => {
                    let _ = status_tx.send("Marked as read".to_string());
                }
                Err(e) => {
                    let _ = status_tx.send(format!("mark-as-read failed: {e}"));
                }
            }
        });
    }

    fn show_unread(&self) {
        let client = self.client.clone();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            match client.unread_counts().await {
                Ok(rows) if rows.is_empty() => {
                    let _ = status_tx.send("No unread messages".to_string());
                }
                Ok(rows) => {
                    for row in rows {
                        let _ = status_tx.send(format!(
                            "{} unread in conversation {}",
                            row.unread,
                            &row.conversation_id.to_string()[..8]
                        ));
                    }
                }
                Err(e) => {
                    let _ = status_tx.send(format!("unread lookup failed: {e}"));
                }
            }
        });
    }

    fn search(&self, query: &str) {
        let client = self.client.clone();
        let status_tx = self.status_tx.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            match client.search_messages(&query).await {
                Ok(rows) if rows.is_empty() => {
                    let _ = status_tx.send(format!("No matches for \"{query}\""));
                }
                Ok(rows) => {
                    for row in rows.iter().take(10) {
                        let name = row
                            .sender
                            .as_ref()
                            .map(|s| s.name.as_str())
                            .unwrap_or("?");
                        let _ = status_tx.send(format!(
                            "[{}] <{}> {}",
                            &row.conversation_id.to_string()[..8],
                            name,
                            row.content
                        ));
                    }
                    if rows.len() > 10 {
                        let _ = status_tx.send(format!("...and {} more", rows.len() - 10));
                    }
                }
                Err(e) => {
                    let _ = status_tx.send(format!("search failed: {e}"));
                }
            }
        });
    }

    fn set_mood(&mut self, arg: &str) {
        let mood = match arg {
            "happy" => Mood::Happy,
            "sad" => Mood::Sad,
            "angry" => Mood::Angry,
            "anxious" => Mood::Anxious,
            "neutral" => Mood::Neutral,
            other => {
                self.add_status_message(format!("Unknown mood: {other}"));
                return;
            }
        };
        self.mood = mood;
        self.add_status_message(format!("Mood set to {arg}"));
    }

    fn set_presence(&mut self, arg: &str) {
        match arg.parse::<PresenceStatus>() {
            Ok(status) => {
                self.presence.announce(status);
                self.add_status_message(format!("Presence set to {status}"));
            }
            Err(e) => self.add_status_message(e),
        }
    }

    fn show_roster(&mut self) {
        if self.roster.is_empty() {
            self.add_status_message("Nobody else seen yet".to_string());
            return;
        }
        let mut entries: Vec<(Uuid, PresenceStatus)> =
            self.roster.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(id, _)| *id);
        for (user_id, status) in entries {
            self.add_status_message(format!("{} is {}", &user_id.to_string()[..8], status));
        }
    }

    fn show_help(&mut self) {
        let help_text = vec![
            "Tidechat Commands:".to_string(),
            "/list - List your conversations".to_string(),
            "/open <index|uuid> - Open a conversation".to_string(),
            "/close - Close the current conversation".to_string(),
            "/mood <happy|sad|angry|anxious|neutral> - Set the mood tag for sends".to_string(),
            "/image <url> - Send an image message".to_string(),
            "/react <index> <emoji> - React to a message".to_string(),
            "/edit <index> <text> - Edit your own message".to_string(),
            "/resend <index> - Resend a permanently failed message".to_string(),
            "/read - Mark the open conversation as read".to_string(),
            "/unread - Show unread counts".to_string(),
            "/search <query> - Search your messages".to_string(),
            "/status <online|away|busy|offline> - Set your presence".to_string(),
            "/who - Show known presence".to_string(),
            "/quit - Exit tidechat".to_string(),
            "Anything else is sent to the open conversation.".to_string(),
        ];
        for line in help_text {
            self.add_status_message(line);
        }
    }

    /// Composition activity; emits a throttled typing signal. The matching
    /// `typing=false` comes from the idle timer, not from the send itself:
    /// peers clear the indicator when the message row arrives, so an
    /// immediate stop signal would only duplicate that.
    fn composing(&mut self, now: Instant) {
        let Some(conversation_id) = self.store.open_id() else {
            return;
        };
        if self.typing_out.on_keystroke(now) {
            self.broadcast_typing(conversation_id, true);
        }
    }

    fn broadcast_typing(&self, conversation_id: Uuid, typing: bool) {
        let signal = TypingSignal {
            conversation_id,
            user_id: self.session.user_id,
            name: self.session.name.clone(),
            typing,
        };
        if let Ok(payload) = serde_json::to_value(&signal) {
            self.feed.broadcast(typing_topic(conversation_id), payload);
        }
    }

    fn remember_sender(&mut self, message: &Message) {
        if let Some(summary) = &message.sender {
            self.profiles.remember(message.sender_id, summary);
        }
    }

    /// Re-fetch a bare feed row with the sender embed and route the hydrated
    /// row back through the normal update merge.
    fn spawn_sender_hydrate(&self, conversation_id: Uuid, message_id: Uuid) {
        let client = self.client.clone();
        let send_tx = self.send_tx.clone();
        tokio::spawn(async move {
            match client.fetch_message(message_id).await {
                Ok(row) => {
                    let _ = send_tx.send(SendOutcome {
                        conversation_id,
                        event: MergeEvent::RemoteUpdate(row.into_message()),
                    });
                }
                Err(e) => debug!("sender hydrate failed for {message_id}: {e}"),
            }
        });
    }

    fn handle_feed_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::MessageInserted(row) => {
                if row.deleted_at.is_some() {
                    return;
                }
                let conversation_id = row.conversation_id;
                let row_id = row.id;
                let own = row.sender_id == self.session.user_id;
                let mut message = row.into_message();
                self.remember_sender(&message);
                // Feed rows arrive without the sender embed; fill from the
                // profile cache, or hydrate with a re-fetch.
                if !self.profiles.fill(&mut message) && !own {
                    self.spawn_sender_hydrate(conversation_id, row_id);
                }
                self.store
                    .touch(conversation_id, &message.content, message.created_at);
                let applied = self
                    .store
                    .apply_if_open(conversation_id, MergeEvent::RemoteInsert(message.clone()));
                if applied && !own {
                    self.typing_in.stop(message.sender_id);
                    print_message(&message);
                }
            }
            FeedEvent::MessageUpdated(row) => {
                let conversation_id = row.conversation_id;
                // Soft delete arrives as an update with deleted_at set.
                if row.deleted_at.is_some() {
                    self.store.apply_if_open(
                        conversation_id,
                        MergeEvent::RemoteDelete(row.id.to_string()),
                    );
                    return;
                }
                let mut message = row.into_message();
                self.remember_sender(&message);
                self.profiles.fill(&mut message);
                if self
                    .store
                    .apply_if_open(conversation_id, MergeEvent::RemoteUpdate(message.clone()))
                {
                    self.add_status_message(format!(
                        "{} edited: {}",
                        message.sender_name(),
                        message.content
                    ));
                }
            }
            FeedEvent::MessageDeleted {
                conversation_id,
                id,
            } => {
                self.store
                    .apply_if_open(conversation_id, MergeEvent::RemoteDelete(id.to_string()));
            }
            FeedEvent::Typing(signal) => {
                if Some(signal.conversation_id) != self.store.open_id()
                    || signal.user_id == self.session.user_id
                {
                    return;
                }
                if signal.typing {
                    self.typing_in
                        .observe(signal.user_id, &signal.name, Instant::now());
                } else {
                    self.typing_in.stop(signal.user_id);
                }
            }
            FeedEvent::PresenceChanged(row) => {
                self.roster.insert(row.user_id, row.status);
            }
        }
    }

    fn handle_send_outcome(&mut self, outcome: SendOutcome) {
        let SendOutcome {
            conversation_id,
            event,
        } = outcome;

        match &event {
            MergeEvent::SendSucceeded { confirmed, .. } => {
                self.store
                    .touch(conversation_id, &confirmed.content, confirmed.created_at);
                self.remember_sender(confirmed);
            }
            MergeEvent::RemoteUpdate(message) => self.remember_sender(message),
            _ => {}
        }

        let failed_id = match &event {
            MergeEvent::SendFailed { provisional_id }
            | MergeEvent::SendFailedPermanently { provisional_id }
            | MergeEvent::SendRejected { provisional_id } => Some(provisional_id.clone()),
            _ => None,
        };

        if !self.store.apply_if_open(conversation_id, event) {
            return;
        }

        // Re-render the entry so its failure marker is visible.
        if let Some(id) = failed_id {
            if let Some(message) = self
                .store
                .current()
                .and_then(|c| c.messages.iter().find(|m| m.id == id))
            {
                print_message(message);
            }
        }
    }

    pub async fn on_tick(&mut self) -> Result<()> {
        while let Ok(event) = self.feed_rx.try_recv() {
            self.handle_feed_event(event);
        }
        while let Ok(outcome) = self.send_rx.try_recv() {
            self.handle_send_outcome(outcome);
        }
        while let Ok(status) = self.status_rx.try_recv() {
            self.add_status_message(status);
        }

        let now = Instant::now();
        if self.typing_out.idle_stop(now) {
            if let Some(id) = self.store.open_id() {
                self.broadcast_typing(id, false);
            }
        }

        let indicator = self.typing_in.indicator(now);
        if indicator != self.last_indicator {
            if let Some(text) = &indicator {
                println!("· {text}");
            }
            self.last_indicator = indicator;
        }

        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.close_conversation();
        self.presence.announce_offline_and_wait().await;
    }

    pub fn add_status_message(&mut self, message: String) {
        let line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
        println!("{line}");
        self.status_messages.push(line);

        // Keep only last 1000 status messages
        if self.status_messages.len() > 1000 {
            self.status_messages.remove(0);
        }
    }
}

fn print_message(message: &Message) {
    let time = message
        .created_at
        .with_timezone(&chrono::Local)
        .format("%H:%M");
    println!(
        "[{}] <{}> {}",
        time,
        message.sender_name(),
        message.display_content()
    );
}
