//! Missive API client.
//!
//! Bearer-token authenticated against the fixed public API base.
//! Conversation listing is cursor-paginated with unix-epoch
//! `updated_after`; messages are fetched per conversation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::info;

use inflow_core::{defaults, Error, Result, Source};

use crate::retry::{execute_with_retry, rate_limiter, ClientRateLimiter, RetryPolicy};
use crate::{id_string, parse_timestamp, ListQuery, UpdatedPage, UpstreamItem};

/// Public Missive API base URL.
pub const MISSIVE_BASE_URL: &str = "https://public.missiveapp.com/v1";

/// Client for the Missive API.
pub struct MissiveClient {
    base_url: String,
    api_token: String,
    http: reqwest::Client,
    limiter: ClientRateLimiter,
    policy: RetryPolicy,
    page_size: u32,
}

impl MissiveClient {
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_token, MISSIVE_BASE_URL)
    }

    /// Base URL override for tests.
    pub fn with_base_url(api_token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            http,
            limiter: rate_limiter(defaults::CLIENT_RATE_LIMIT_PER_SEC),
            policy: RetryPolicy::default(),
            page_size: defaults::MISSIVE_PAGE_SIZE,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .header("Accept", "application/json")
    }

    /// All messages in a conversation. The handler fans these out into one
    /// canonical email each.
    pub async fn get_conversation_messages(&self, conversation_id: &str) -> Result<Vec<JsonValue>> {
        let path = format!("/conversations/{conversation_id}/messages");
        let response =
            execute_with_retry(&self.limiter, &self.policy, "missive.get_messages", || {
                self.get(&path)
            })
            .await?;

        let body: JsonValue = response.json().await?;
        Ok(body
            .get("messages")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Create a webhook for one event type, returning the hook id.
    pub async fn create_hook(&self, target_url: &str, event_type: &str) -> Result<String> {
        let body = serde_json::json!({
            "hooks": { "type": event_type, "url": target_url }
        });
        let response =
            execute_with_retry(&self.limiter, &self.policy, "missive.create_hook", || {
                self.http
                    .post(format!("{}/hooks", self.base_url))
                    .bearer_auth(&self.api_token)
                    .json(&body)
            })
            .await?;

        let body: JsonValue = response.json().await?;
        body.pointer("/hooks/id")
            .and_then(id_string)
            .ok_or_else(|| Error::PermanentUpstream("hook create response missing id".into()))
    }

    /// Delete a webhook. A 404 counts as success.
    pub async fn delete_hook(&self, hook_id: &str) -> Result<()> {
        let result =
            execute_with_retry(&self.limiter, &self.policy, "missive.delete_hook", || {
                self.http
                    .delete(format!("{}/hooks/{hook_id}", self.base_url))
                    .bearer_auth(&self.api_token)
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Gone(_)) => {
                info!(
                    source = "missive",
                    op = "delete_hook",
                    hook_id,
                    "Hook already gone"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl crate::UpstreamSource for MissiveClient {
    fn source(&self) -> Source {
        Source::Missive
    }

    async fn list_updated_since(&self, query: ListQuery<'_>) -> Result<UpdatedPage> {
        let mut path = format!(
            "/conversations?updated_after={}&limit={}",
            query.since.timestamp(),
            self.page_size
        );
        if let Some(cursor) = query.cursor {
            path.push_str("&cursor=");
            path.push_str(cursor);
        }

        let response = execute_with_retry(
            &self.limiter,
            &self.policy,
            "missive.list_conversations",
            || self.get(&path),
        )
        .await?;
        let body: JsonValue = response.json().await?;

        let conversations = body
            .get("conversations")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let items = conversations
            .iter()
            .filter_map(|conv| {
                Some(UpstreamItem {
                    external_id: id_string(conv.get("id")?)?,
                    updated_at: conv
                        .get("last_activity_at")
                        .or_else(|| conv.get("updated_at"))
                        .and_then(parse_timestamp),
                })
            })
            .collect();

        let next_cursor = body
            .get("next_cursor")
            .and_then(|c| c.as_str())
            .map(String::from);

        Ok(UpdatedPage {
            items,
            exhausted: next_cursor.is_none(),
            next_cursor,
        })
    }
}
