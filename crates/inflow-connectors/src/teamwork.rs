//! Teamwork API client.
//!
//! Authenticates with the API key as the basic-auth username. Task listing
//! is page-number paginated; `updatedAfterDate` takes the compact
//! `YYYYMMDDHHMMSS` form. Webhook administration uses the v1 endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use inflow_core::{defaults, Error, Result, Source};

use crate::retry::{execute_with_retry, rate_limiter, ClientRateLimiter, RetryPolicy};
use crate::{id_string, parse_timestamp, ListQuery, UpdatedPage, UpstreamItem};

/// Client for the Teamwork API.
pub struct TeamworkClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    limiter: ClientRateLimiter,
    policy: RetryPolicy,
    page_size: u32,
}

impl TeamworkClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
            limiter: rate_limiter(defaults::CLIENT_RATE_LIMIT_PER_SEC),
            policy: RetryPolicy::default(),
            page_size: defaults::TEAMWORK_PAGE_SIZE,
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.api_key, Some(""))
            .header("Accept", "application/json")
    }

    /// Fetch a single task. A 404 surfaces as [`Error::Gone`], which the
    /// handler turns into a soft delete.
    pub async fn get_task(&self, task_id: &str) -> Result<JsonValue> {
        let path = format!("/projects/api/v3/tasks/{task_id}.json");
        let response = execute_with_retry(&self.limiter, &self.policy, "teamwork.get_task", || {
            self.get(&path)
        })
        .await?;

        let body: JsonValue = response.json().await?;
        body.get("task")
            .cloned()
            .ok_or_else(|| Error::PermanentUpstream("task response missing 'task'".into()))
    }

    /// All people in the installation, for the identity cache.
    pub async fn list_people(&self) -> Result<Vec<JsonValue>> {
        self.list_collection("/people.json", "people").await
    }

    /// All tags in the installation, for the identity cache.
    pub async fn list_tags(&self) -> Result<Vec<JsonValue>> {
        self.list_collection("/tags.json", "tags").await
    }

    async fn list_collection(&self, path: &str, key: &str) -> Result<Vec<JsonValue>> {
        let mut all = Vec::new();
        let mut page: u32 = 1;

        loop {
            let url = format!("{path}?page={page}&pageSize={}", self.page_size);
            let response =
                execute_with_retry(&self.limiter, &self.policy, "teamwork.list", || {
                    self.get(&url)
                })
                .await?;
            let body: JsonValue = response.json().await?;
            let batch = body
                .get(key)
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();

            let batch_len = batch.len();
            all.extend(batch);
            if batch_len < self.page_size as usize {
                break;
            }
            page += 1;
        }

        debug!(
            source = "teamwork",
            op = "list_collection",
            item_count = all.len(),
            key,
            "Fetched collection"
        );
        Ok(all)
    }

    /// Create a webhook registration for one event type, returning the id
    /// Teamwork assigned.
    pub async fn create_webhook(&self, target_url: &str, event: &str) -> Result<String> {
        let body = serde_json::json!({
            "webhook": { "url": target_url, "event": event, "active": true }
        });
        let response = execute_with_retry(
            &self.limiter,
            &self.policy,
            "teamwork.create_webhook",
            || {
                self.http
                    .post(format!("{}/projects/api/v1/webhooks.json", self.base_url))
                    .basic_auth(&self.api_key, Some(""))
                    .header("Accept", "application/json")
                    .json(&body)
            },
        )
        .await?;

        let body: JsonValue = response.json().await?;
        body.pointer("/webhook/id")
            .or_else(|| body.get("id"))
            .and_then(id_string)
            .ok_or_else(|| {
                Error::PermanentUpstream("webhook create response missing id".into())
            })
    }

    /// Delete a webhook registration. A 404 means it is already gone and
    /// counts as success.
    pub async fn delete_webhook(&self, registration_id: &str) -> Result<()> {
        let result = execute_with_retry(
            &self.limiter,
            &self.policy,
            "teamwork.delete_webhook",
            || {
                self.http
                    .delete(format!(
                        "{}/projects/api/v1/webhooks/{registration_id}.json",
                        self.base_url
                    ))
                    .basic_auth(&self.api_key, Some(""))
                    .header("Accept", "application/json")
            },
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(Error::Gone(_)) => {
                info!(
                    source = "teamwork",
                    op = "delete_webhook",
                    registration_id,
                    "Webhook already gone"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Teamwork's `updatedAfterDate` format.
pub fn format_updated_after(since: DateTime<Utc>) -> String {
    since.format("%Y%m%d%H%M%S").to_string()
}

#[async_trait]
impl crate::UpstreamSource for TeamworkClient {
    fn source(&self) -> Source {
        Source::Teamwork
    }

    async fn list_updated_since(&self, query: ListQuery<'_>) -> Result<UpdatedPage> {
        let page: u32 = query
            .cursor
            .and_then(|c| c.parse().ok())
            .unwrap_or(1)
            .max(1);

        let path = format!(
            "/projects/api/v3/tasks.json?page={page}&pageSize={}&updatedAfterDate={}\
             &includeCompletedTasks={}&includeArchivedProjects=true",
            self.page_size,
            format_updated_after(query.since),
            query.include_completed,
        );

        let response =
            execute_with_retry(&self.limiter, &self.policy, "teamwork.list_tasks", || {
                self.get(&path)
            })
            .await?;
        let body: JsonValue = response.json().await?;

        let tasks = body
            .get("tasks")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let exhausted = tasks.len() < self.page_size as usize;
        let items = tasks
            .iter()
            .filter_map(|task| {
                Some(UpstreamItem {
                    external_id: id_string(task.get("id")?)?,
                    updated_at: task.get("updatedAt").and_then(parse_timestamp),
                })
            })
            .collect();

        Ok(UpdatedPage {
            items,
            next_cursor: (!exhausted).then(|| (page + 1).to_string()),
            exhausted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_updated_after() {
        let since = "2025-10-15T12:00:05Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(format_updated_after(since), "20251015120005");
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = TeamworkClient::new("https://acme.teamwork.com/", "key").unwrap();
        assert_eq!(client.base_url, "https://acme.teamwork.com");
    }
}
