use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::rows::{
    ConversationRow, MessageRow, NewMessage, NewReaction, PresenceStatus, UnreadRow,
};

/// One consistent bound for every request; a timeout counts as a
/// connectivity failure and feeds the retry policy.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const BACKFILL_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Request never reached the service, or timed out. Retryable.
    #[error("connectivity: {0}")]
    Connectivity(String),
    /// The principal is not permitted. Never retried.
    #[error("not permitted: {0}")]
    Authorization(String),
    /// The service rejected the payload. Never retried.
    #[error("rejected: {0}")]
    Validation(String),
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Connectivity(_))
    }
}

/// Thin client over the row service's generated REST surface. Rows live under
/// `rest/v1/<table>`, server functions under `rest/v1/rpc/<name>`; every
/// request carries the API key and the caller's bearer token, and
/// authorization is enforced row-by-row on the server.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    token: String,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: &str, token: &str) -> anyhow::Result<Self> {
        let base = base_url.trim_end_matches('/').to_string();
        url::Url::parse(&base)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base,
            api_key: api_key.to_string(),
            token: token.to_string(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base, name)
    }

    fn rpc(&self, name: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base, name)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| BackendError::Connectivity(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = self.execute(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::Unexpected(e.to_string()))
    }

    /// Atomic single-row insert; returns the stored row with the
    /// server-assigned identifier and timestamp.
    pub async fn insert_message(&self, new: &NewMessage) -> Result<MessageRow, BackendError> {
        let rows: Vec<MessageRow> = self
            .execute_json(
                self.http
                    .post(self.table("messages"))
                    .header("Prefer", "return=representation")
                    .query(&[("select", "*,sender:users(name,handle,avatar_url)")])
                    .json(new),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Unexpected("insert returned no row".to_string()))
    }

    /// Recent history for one conversation, ascending creation time.
    pub async fn fetch_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<MessageRow>, BackendError> {
        self.execute_json(self.http.get(self.table("messages")).query(&[
            ("conversation_id", format!("eq.{conversation_id}")),
            ("deleted_at", "is.null".to_string()),
            ("select", "*,sender:users(name,handle,avatar_url)".to_string()),
            ("order", "created_at.asc".to_string()),
            ("limit", BACKFILL_LIMIT.to_string()),
        ]))
        .await
    }

    /// Single-row re-fetch with the sender embed. Change-feed rows arrive
    /// bare; this hydrates the denormalized sender for display.
    pub async fn fetch_message(&self, id: Uuid) -> Result<MessageRow, BackendError> {
        let rows: Vec<MessageRow> = self
            .execute_json(self.http.get(self.table("messages")).query(&[
                ("id", format!("eq.{id}")),
                ("select", "*,sender:users(name,handle,avatar_url)".to_string()),
            ]))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Unexpected("message not found".to_string()))
    }

    /// Conversations the principal participates in, most recent first.
    pub async fn fetch_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationRow>, BackendError> {
        self.execute_json(self.http.get(self.table("conversations")).query(&[
            ("participants", format!("cs.{{{user_id}}}")),
            ("order", "last_message_at.desc.nullslast".to_string()),
        ]))
        .await
    }

    /// Partial update of our own message; returns the updated row.
    pub async fn update_message(
        &self,
        id: Uuid,
        content: &str,
    ) -> Result<MessageRow, BackendError> {
        let rows: Vec<MessageRow> = self
            .execute_json(
                self.http
                    .patch(self.table("messages"))
                    .header("Prefer", "return=representation")
                    .query(&[("id", format!("eq.{id}"))])
                    .json(&json!({ "content": content })),
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Unexpected("update matched no row".to_string()))
    }

    pub async fn add_reaction(&self, new: &NewReaction) -> Result<(), BackendError> {
        self.execute(
            self.http
                .post(self.table("reactions"))
                .header("Prefer", "return=minimal")
                .json(new),
        )
        .await?;
        Ok(())
    }

    /// Overwrite the caller's single presence record, last write wins.
    pub async fn upsert_presence(
        &self,
        user_id: Uuid,
        status: PresenceStatus,
    ) -> Result<(), BackendError> {
        self.execute(
            self.http
                .post(self.table("presence"))
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&json!({ "user_id": user_id, "status": status })),
        )
        .await?;
        Ok(())
    }

    pub async fn unread_counts(&self) -> Result<Vec<UnreadRow>, BackendError> {
        self.execute_json(self.http.post(self.rpc("unread_count")).json(&json!({})))
            .await
    }

    pub async fn mark_conversation_read(&self, conversation_id: Uuid) -> Result<(), BackendError> {
        self.execute(
            self.http
                .post(self.rpc("mark_conversation_read"))
                .json(&json!({ "conversation_id": conversation_id })),
        )
        .await?;
        Ok(())
    }

    /// Full-text search across the caller's conversations.
    pub async fn search_messages(&self, query: &str) -> Result<Vec<MessageRow>, BackendError> {
        self.execute_json(
            self.http
                .post(self.rpc("search_messages"))
                .json(&json!({ "query": query })),
        )
        .await
    }
}

fn map_status(status: StatusCode, body: String) -> BackendError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    match status.as_u16() {
        401 | 403 => BackendError::Authorization(detail),
        400 | 404 | 409 | 422 => BackendError::Validation(detail),
        // Gateway-level failures behave like an unreachable service.
        502 | 503 | 504 => BackendError::Connectivity(detail),
        _ => BackendError::Unexpected(format!("{status}: {detail}")),
    }
}
