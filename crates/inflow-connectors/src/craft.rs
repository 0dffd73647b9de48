//! Craft document API client (optional source, poll-only).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use inflow_core::{defaults, Error, Result, Source};

use crate::retry::{execute_with_retry, rate_limiter, ClientRateLimiter, RetryPolicy};
use crate::{id_string, parse_timestamp, ListQuery, UpdatedPage, UpstreamItem};

/// Client for the Craft documents API.
pub struct CraftClient {
    base_url: String,
    http: reqwest::Client,
    limiter: ClientRateLimiter,
    policy: RetryPolicy,
}

impl CraftClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            limiter: rate_limiter(defaults::CLIENT_RATE_LIMIT_PER_SEC),
            policy: RetryPolicy::default(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
    }

    /// Fetch a single document with content and metadata.
    pub async fn get_document(&self, doc_id: &str) -> Result<JsonValue> {
        let path = format!("/api/documents/{doc_id}");
        let response =
            execute_with_retry(&self.limiter, &self.policy, "craft.get_document", || {
                self.get(&path)
            })
            .await?;

        let body: JsonValue = response.json().await?;
        // Some deployments wrap the document, some return it bare.
        Ok(body.get("document").cloned().unwrap_or(body))
    }
}

#[async_trait]
impl crate::UpstreamSource for CraftClient {
    fn source(&self) -> Source {
        Source::Craft
    }

    async fn list_updated_since(&self, query: ListQuery<'_>) -> Result<UpdatedPage> {
        let path = format!(
            "/api/documents?updated_since={}",
            query.since.timestamp()
        );
        let response =
            execute_with_retry(&self.limiter, &self.policy, "craft.list_documents", || {
                self.get(&path)
            })
            .await?;
        let body: JsonValue = response.json().await?;

        let documents = body
            .get("documents")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let items = documents
            .iter()
            .filter_map(|doc| {
                Some(UpstreamItem {
                    external_id: id_string(doc.get("id")?)?,
                    updated_at: doc.get("updated_at").and_then(parse_timestamp),
                })
            })
            .collect();

        // The document listing is not paginated; one page covers the window.
        Ok(UpdatedPage {
            items,
            next_cursor: None,
            exhausted: true,
        })
    }
}
