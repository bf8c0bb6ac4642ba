use rand::{thread_rng, Rng};
use uuid::Uuid;

use crate::store::SenderSummary;

/// The authenticated principal every request runs as. Token issuance is the
/// service's concern; we only carry the result.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub token: String,
    pub name: String,
    pub handle: String,
    pub avatar_url: Option<String>,
}

impl Session {
    pub fn new(user_id: Uuid, token: &str, name: Option<&str>, handle: Option<&str>) -> Self {
        let handle = handle
            .map(str::to_string)
            .unwrap_or_else(generate_guest_handle);
        let name = name.map(str::to_string).unwrap_or_else(|| handle.clone());
        Self {
            user_id,
            token: token.to_string(),
            name,
            handle,
            avatar_url: None,
        }
    }

    /// Unauthenticated session with a throwaway identity. Reads and writes
    /// will be rejected by the service; useful for poking at a local stack.
    pub fn guest() -> Self {
        Self::new(Uuid::new_v4(), "", None, None)
    }

    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn summary(&self) -> SenderSummary {
        SenderSummary {
            name: self.name.clone(),
            handle: self.handle.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Random guest handle, format: {adjective}{noun}{number}
fn generate_guest_handle() -> String {
    let adjectives = [
        "quiet", "swift", "bright", "mellow", "drifting", "hidden", "amber", "silver", "misty",
        "bold", "gentle", "late", "early", "wandering", "distant", "low",
    ];

    let nouns = [
        "tide", "wave", "current", "harbor", "reef", "gull", "brook", "delta", "estuary", "shoal",
        "lagoon", "breaker", "swell", "drift", "channel", "cove",
    ];

    let mut rng = thread_rng();
    let adjective = adjectives[rng.gen_range(0..adjectives.len())];
    let noun = nouns[rng.gen_range(0..nouns.len())];
    let number: u16 = rng.gen_range(100..9999);

    format!("{}{}{}", adjective, noun, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_sessions_are_unauthenticated_with_a_handle() {
        let session = Session::guest();
        assert!(!session.is_authenticated());
        assert!(!session.handle.is_empty());
        assert_eq!(session.name, session.handle);
    }

    #[test]
    fn explicit_identity_is_kept() {
        let id = Uuid::new_v4();
        let session = Session::new(id, "jwt", Some("Alice"), Some("alice"));
        assert!(session.is_authenticated());
        assert_eq!(session.summary().name, "Alice");
        assert_eq!(session.summary().handle, "alice");
    }
}
