use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::client::BackendClient;
use super::rows::PresenceStatus;

/// Best-effort liveness announcements. Each announcement overwrites the
/// user's single presence record; near-simultaneous writes resolve to last
/// write wins at the store, so there is nothing to coordinate here.
pub struct PresenceTracker {
    client: BackendClient,
    user_id: Uuid,
    status_tx: mpsc::UnboundedSender<String>,
}

impl PresenceTracker {
    pub fn new(
        client: BackendClient,
        user_id: Uuid,
        status_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            client,
            user_id,
            status_tx,
        }
    }

    /// Fire-and-forget announcement; failures surface as a status line, not
    /// an error, since presence is advisory.
    pub fn announce(&self, status: PresenceStatus) {
        let client = self.client.clone();
        let user_id = self.user_id;
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            match client.upsert_presence(user_id, status).await {
                Ok(()) => debug!("presence set to {status}"),
                Err(e) => {
                    let _ = status_tx.send(format!("presence update failed: {e}"));
                }
            }
        });
    }

    /// Final announcement on the way out; awaited so process exit does not
    /// race the request. Errors are ignored, the record self-corrects on the
    /// next session.
    pub async fn announce_offline_and_wait(&self) {
        let _ = self
            .client
            .upsert_presence(self.user_id, PresenceStatus::Offline)
            .await;
    }
}
