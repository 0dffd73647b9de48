//! # inflow-connectors
//!
//! Authenticated HTTP clients for the upstream services the connector
//! mirrors: Teamwork (tasks), Missive (emails), and optionally Craft
//! (documents). All clients share one retry/backoff/rate-limit layer and
//! expose a common paging interface for the poller.

pub mod craft;
pub mod identity;
pub mod missive;
pub mod retry;
pub mod teamwork;

pub use craft::CraftClient;
pub use identity::IdentityCache;
pub use missive::MissiveClient;
pub use retry::{classify_status, rate_limiter, ClientRateLimiter, RetryPolicy, StatusClass};
pub use teamwork::TeamworkClient;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as JsonValue;

use inflow_core::{Result, Source};

/// One entity reference from an incremental list page.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamItem {
    pub external_id: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of an incremental listing.
#[derive(Debug, Clone, Default)]
pub struct UpdatedPage {
    pub items: Vec<UpstreamItem>,
    /// Continuation for the next call; `None` when exhausted.
    pub next_cursor: Option<String>,
    pub exhausted: bool,
}

/// Parameters for one incremental list call.
#[derive(Debug, Clone)]
pub struct ListQuery<'a> {
    pub since: DateTime<Utc>,
    pub cursor: Option<&'a str>,
    /// Teamwork-only initial-sync filter; other sources ignore it.
    pub include_completed: bool,
}

impl<'a> ListQuery<'a> {
    pub fn new(since: DateTime<Utc>) -> Self {
        Self {
            since,
            cursor: None,
            include_completed: true,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<&'a str>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn include_completed(mut self, include: bool) -> Self {
        self.include_completed = include;
        self
    }
}

/// Incremental listing interface the poller drives, one implementation per
/// upstream service.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch one page of entities updated since `query.since`.
    async fn list_updated_since(&self, query: ListQuery<'_>) -> Result<UpdatedPage>;
}

/// Parse the timestamp shapes upstream APIs actually send: RFC 3339
/// strings, bare `YYYY-MM-DDTHH:MM:SSZ`, and unix epoch seconds as number
/// or string.
pub fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            // Epoch seconds shipped as a string.
            if let Ok(secs) = s.parse::<i64>() {
                return Utc.timestamp_opt(secs, 0).single();
            }
            None
        }
        JsonValue::Number(n) => {
            if let Some(secs) = n.as_i64() {
                Utc.timestamp_opt(secs, 0).single()
            } else {
                n.as_f64()
                    .and_then(|f| Utc.timestamp_opt(f as i64, 0).single())
            }
        }
        _ => None,
    }
}

/// Extract an id that may arrive as a JSON number or string.
pub fn id_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_rfc3339() {
        let ts = parse_timestamp(&serde_json::json!("2025-10-15T12:00:00Z")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-15T12:00:00+00:00");

        let ts = parse_timestamp(&serde_json::json!("2025-10-15T14:00:00+02:00")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-15T12:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_epoch() {
        let ts = parse_timestamp(&serde_json::json!(1_760_529_600)).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-15T12:00:00+00:00");

        let ts = parse_timestamp(&serde_json::json!("1760529600")).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-15T12:00:00+00:00");

        let ts = parse_timestamp(&serde_json::json!(1_760_529_600.7)).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-15T12:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        assert!(parse_timestamp(&serde_json::json!("")).is_none());
        assert!(parse_timestamp(&serde_json::json!("next tuesday")).is_none());
        assert!(parse_timestamp(&serde_json::json!(null)).is_none());
        assert!(parse_timestamp(&serde_json::json!({"at": 1})).is_none());
    }

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(&serde_json::json!(42)), Some("42".to_string()));
        assert_eq!(id_string(&serde_json::json!("T42")), Some("T42".to_string()));
        assert_eq!(id_string(&serde_json::json!("")), None);
        assert_eq!(id_string(&serde_json::json!(null)), None);
    }
}
