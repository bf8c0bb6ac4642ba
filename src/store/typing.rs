use std::time::{Duration, Instant};
use uuid::Uuid;

pub const TYPING_THROTTLE: Duration = Duration::from_millis(500);
pub const TYPING_IDLE_STOP: Duration = Duration::from_millis(1000);
pub const TYPING_EXPIRY: Duration = Duration::from_millis(3000);

/// Outbound side: throttles "typing" signals while composing and emits a
/// single "stopped" signal after the keyboard goes idle.
#[derive(Debug, Default)]
pub struct TypingThrottle {
    last_signal: Option<Instant>,
    last_keystroke: Option<Instant>,
}

impl TypingThrottle {
    /// Returns true when a `typing=true` signal should go out now.
    pub fn on_keystroke(&mut self, now: Instant) -> bool {
        self.last_keystroke = Some(now);
        match self.last_signal {
            Some(sent) if now.duration_since(sent) < TYPING_THROTTLE => false,
            _ => {
                self.last_signal = Some(now);
                true
            }
        }
    }

    /// Returns true once when the idle window has elapsed since the last
    /// keystroke; a `typing=false` signal should go out.
    pub fn idle_stop(&mut self, now: Instant) -> bool {
        match self.last_keystroke {
            Some(last) if now.duration_since(last) >= TYPING_IDLE_STOP => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Sending a message implies composition ended.
    pub fn reset(&mut self) -> bool {
        let was_composing = self.last_keystroke.is_some();
        self.last_keystroke = None;
        self.last_signal = None;
        was_composing
    }
}

#[derive(Debug)]
struct TypingEntry {
    user_id: Uuid,
    name: String,
    expires_at: Instant,
}

/// Inbound side: who is typing right now. Entries expire on their own, so a
/// lost "stop typing" signal (tab close, dropped connection) self-heals.
#[derive(Debug, Default)]
pub struct TypingSet {
    entries: Vec<TypingEntry>,
}

impl TypingSet {
    pub fn observe(&mut self, user_id: Uuid, name: &str, now: Instant) {
        let expires_at = now + TYPING_EXPIRY;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.user_id == user_id) {
            entry.name = name.to_string();
            entry.expires_at = expires_at;
        } else {
            self.entries.push(TypingEntry {
                user_id,
                name: name.to_string(),
                expires_at,
            });
        }
    }

    pub fn stop(&mut self, user_id: Uuid) {
        self.entries.retain(|e| e.user_id != user_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self, now: Instant) {
        self.entries.retain(|e| e.expires_at > now);
    }

    /// Indicator line for the conversation view, or None when nobody is
    /// typing. First-observed participant leads the phrase.
    pub fn indicator(&mut self, now: Instant) -> Option<String> {
        self.prune(now);
        match self.entries.as_slice() {
            [] => None,
            [a] => Some(format!("{} is typing", a.name)),
            [a, b] => Some(format!("{} and {} are typing", a.name, b.name)),
            [a, rest @ ..] => Some(format!("{} and {} others are typing", a.name, rest.len())),
        }
    }
}
