//! Request surface: history, conversations and notification summaries.

use crate::{EngineError, EngineResult};
use chat_types::{ChatMessage, Conversation, NotificationSummary, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One row from the notification details endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub id: String,
    pub kind: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Deserialize)]
struct UnreadResponse {
    unread: u32,
}

#[derive(Debug, Serialize)]
struct MarkNotificationsRequest<'a> {
    /// Empty means "all".
    ids: &'a [String],
}

/// HTTP client for the chat request surface.
///
/// Results are not cached here; the engine layers its TTL caches on top.
pub struct ChatApi {
    http: reqwest::Client,
    base: Url,
}

impl ChatApi {
    /// Build a client against `base` with the given per-request timeout and
    /// optional bearer credential.
    pub fn new(base: Url, timeout: Duration, token: Option<String>) -> EngineResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = token {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| EngineError::Config(format!("credential is not a header value: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> EngineResult<Url> {
        self.base
            .join(path)
            .map_err(|e| EngineError::Config(format!("bad endpoint {path}: {e}")))
    }

    /// One page of conversation history, newest page first.
    pub async fn history(
        &self,
        tenant_id: &TenantId,
        page: u32,
        limit: u32,
    ) -> EngineResult<Vec<ChatMessage>> {
        let url = self.endpoint(&format!("chat/history/{tenant_id}"))?;
        debug!(tenant_id = %tenant_id, page, limit, "fetching history page");
        let response = self
            .http
            .get(url)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// All conversations for the authenticated tenant.
    pub async fn conversations(&self) -> EngineResult<Vec<Conversation>> {
        let url = self.endpoint("chat/conversations")?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Unread message count for one conversation.
    pub async fn unread_count(&self, tenant_id: &TenantId) -> EngineResult<u32> {
        let url = self.endpoint(&format!("chat/unread/{tenant_id}"))?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        let body: UnreadResponse = response.json().await?;
        Ok(body.unread)
    }

    /// Mark a conversation read on the server.
    pub async fn mark_read(&self, tenant_id: &TenantId) -> EngineResult<()> {
        let url = self.endpoint(&format!("chat/read/{tenant_id}"))?;
        self.http.post(url).send().await?.error_for_status()?;
        Ok(())
    }

    /// Aggregate unread counters.
    pub async fn notification_summary(&self) -> EngineResult<NotificationSummary> {
        let url = self.endpoint("notifications/summary")?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Full notification rows.
    pub async fn notification_details(&self) -> EngineResult<Vec<NotificationItem>> {
        let url = self.endpoint("notifications")?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Mark notifications read by id; an empty list marks all of them.
    pub async fn mark_notifications_read(&self, ids: &[String]) -> EngineResult<()> {
        let url = self.endpoint("notifications/read")?;
        self.http
            .post(url)
            .json(&MarkNotificationsRequest { ids })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// The company list used by the resolver's heuristic strategies.
    pub async fn companies(&self) -> EngineResult<Vec<party_mapping::CompanyRef>> {
        let url = self.endpoint("companies")?;
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
