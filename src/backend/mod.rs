pub use changes::{
    message_topic, realtime_url, typing_topic, ChangeFeed, FeedEvent, SubscriptionHandle,
    TypingSignal, PRESENCE_TOPIC,
};
pub use client::BackendClient;
pub use presence::PresenceTracker;
pub use rows::{NewMessage, NewReaction, PresenceStatus};
pub use session::Session;

mod changes;
mod client;
mod presence;
pub mod retry;
mod rows;
mod session;
