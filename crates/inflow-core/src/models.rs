//! Domain models: queue envelopes, checkpoints, and canonical records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Upstream service an entity originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Teamwork task management.
    Teamwork,
    /// Missive shared inbox.
    Missive,
    /// Craft documents (optional, poll-only).
    Craft,
}

impl Source {
    /// Stable lowercase wire name, used in queue rows, URLs, and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Teamwork => "teamwork",
            Source::Missive => "missive",
            Source::Craft => "craft",
        }
    }

    /// All sources, in dispatch order.
    pub fn all() -> [Source; 3] {
        [Source::Teamwork, Source::Missive, Source::Craft]
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teamwork" => Ok(Source::Teamwork),
            "missive" => Ok(Source::Missive),
            "craft" => Ok(Source::Craft),
            other => Err(Error::InvalidInput(format!("unknown source: {other}"))),
        }
    }
}

/// What a queue envelope asks the dispatcher to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Webhook-observed create or update; payload is the webhook body.
    CreateOrUpdate,
    /// Webhook-observed deletion or trashing.
    Delete,
    /// Poller-observed item; payload is an `{external_id, updated_at}` descriptor.
    PageItem,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::CreateOrUpdate => "create_or_update",
            EnvelopeKind::Delete => "delete",
            EnvelopeKind::PageItem => "page_item",
        }
    }
}

impl FromStr for EnvelopeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_or_update" => Ok(EnvelopeKind::CreateOrUpdate),
            "delete" => Ok(EnvelopeKind::Delete),
            "page_item" => Ok(EnvelopeKind::PageItem),
            other => Err(Error::InvalidInput(format!("unknown envelope kind: {other}"))),
        }
    }
}

/// Queue lifecycle state of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeState {
    Pending,
    Leased,
    Completed,
    Failed,
}

impl EnvelopeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeState::Pending => "pending",
            EnvelopeState::Leased => "leased",
            EnvelopeState::Completed => "completed",
            EnvelopeState::Failed => "failed",
        }
    }
}

impl FromStr for EnvelopeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EnvelopeState::Pending),
            "leased" => Ok(EnvelopeState::Leased),
            "completed" => Ok(EnvelopeState::Completed),
            "failed" => Ok(EnvelopeState::Failed),
            other => Err(Error::InvalidInput(format!("unknown envelope state: {other}"))),
        }
    }
}

/// A unit of work in the durable queue.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Surrogate row id.
    pub id: i64,
    /// Logical id: `source:external_id:kind`. Unique per source.
    pub envelope_id: String,
    pub source: Source,
    pub kind: EnvelopeKind,
    pub external_id: String,
    /// Webhook body or poller descriptor.
    pub payload: JsonValue,
    pub attempts: i32,
    pub state: EnvelopeState,
    pub enqueued_at: DateTime<Utc>,
    pub leased_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A not-yet-persisted envelope, as constructed by ingress or the poller.
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub source: Source,
    pub kind: EnvelopeKind,
    pub external_id: String,
    pub payload: JsonValue,
}

impl NewEnvelope {
    pub fn new(source: Source, kind: EnvelopeKind, external_id: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            external_id: external_id.into(),
            payload: JsonValue::Null,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    /// Poller descriptor envelope for one page item.
    pub fn page_item(
        source: Source,
        external_id: impl Into<String>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        let external_id = external_id.into();
        let payload = serde_json::json!({
            "external_id": external_id,
            "updated_at": updated_at.map(|t| t.to_rfc3339()),
        });
        Self {
            source,
            kind: EnvelopeKind::PageItem,
            external_id,
            payload,
        }
    }

    /// Logical envelope id. Re-enqueueing the same logical event derives the
    /// same id, which is what makes enqueue idempotent.
    pub fn envelope_id(&self) -> String {
        format!("{}:{}:{}", self.source, self.external_id, self.kind.as_str())
    }
}

/// Outcome of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Row inserted, or a retired row reset to pending.
    Inserted,
    /// A pending or leased row with the same id already exists.
    Duplicate,
}

/// Per-source high-water mark for incremental polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: Source,
    /// Latest upstream `updated_at` whose page was durably enqueued.
    pub last_event_time: DateTime<Utc>,
    /// Opaque continuation cursor for cursor-paged sources.
    pub last_cursor: Option<String>,
}

/// Canonical task produced by the Teamwork handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub tag_ids: Vec<String>,
    pub tag_names: Vec<String>,
    pub assignee_ids: Vec<String>,
    pub assignee_names: Vec<String>,
    pub creator_id: Option<String>,
    pub creator_name: Option<String>,
    pub updater_id: Option<String>,
    pub updater_name: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Email attachment metadata. Bytes are fetched only when the sink asks
/// for them via its capability flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub byte_size: i64,
    pub source_url: String,
}

/// Canonical email produced by the Missive handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailRecord {
    pub email_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub labels: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Canonical document produced by the Craft handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocRecord {
    pub doc_id: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub space_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Everything one handler invocation wants written, plus explicit
/// soft-deletions keyed by `(source, external_id)`.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub tasks: Vec<TaskRecord>,
    pub emails: Vec<EmailRecord>,
    pub docs: Vec<DocRecord>,
    pub deletions: Vec<(Source, String)>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.emails.is_empty()
            && self.docs.is_empty()
            && self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len() + self.emails.len() + self.docs.len() + self.deletions.len()
    }

    /// Merge another batch into this one.
    pub fn extend(&mut self, other: RecordBatch) {
        self.tasks.extend(other.tasks);
        self.emails.extend(other.emails);
        self.docs.extend(other.docs);
        self.deletions.extend(other.deletions);
    }
}

/// Queue state counts for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceQueueStats {
    pub source: String,
    pub pending: i64,
    pub leased: i64,
    pub completed: i64,
    pub failed: i64,
    /// Age of the oldest pending envelope in seconds, if any.
    pub oldest_pending_secs: Option<i64>,
    /// Leased envelopes whose lease expired beyond the stuck threshold.
    pub stuck: i64,
}

/// A webhook registration we created upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub source: Source,
    /// Id assigned by the upstream service.
    pub registration_id: String,
    pub target_url: String,
    pub event: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trip() {
        for source in Source::all() {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
    }

    #[test]
    fn test_source_unknown_rejected() {
        assert!("github".parse::<Source>().is_err());
        assert!("".parse::<Source>().is_err());
        assert!("Teamwork".parse::<Source>().is_err());
    }

    #[test]
    fn test_envelope_kind_round_trip() {
        for kind in [
            EnvelopeKind::CreateOrUpdate,
            EnvelopeKind::Delete,
            EnvelopeKind::PageItem,
        ] {
            assert_eq!(kind.as_str().parse::<EnvelopeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_envelope_state_round_trip() {
        for state in [
            EnvelopeState::Pending,
            EnvelopeState::Leased,
            EnvelopeState::Completed,
            EnvelopeState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<EnvelopeState>().unwrap(), state);
        }
    }

    #[test]
    fn test_envelope_id_derivation() {
        let env = NewEnvelope::new(Source::Teamwork, EnvelopeKind::CreateOrUpdate, "T42");
        assert_eq!(env.envelope_id(), "teamwork:T42:create_or_update");

        let env = NewEnvelope::new(Source::Missive, EnvelopeKind::Delete, "conv-9");
        assert_eq!(env.envelope_id(), "missive:conv-9:delete");
    }

    #[test]
    fn test_envelope_id_stable_across_payloads() {
        // Same logical event, different body → same id, so enqueue dedups.
        let a = NewEnvelope::new(Source::Teamwork, EnvelopeKind::CreateOrUpdate, "7")
            .with_payload(serde_json::json!({"n": 1}));
        let b = NewEnvelope::new(Source::Teamwork, EnvelopeKind::CreateOrUpdate, "7")
            .with_payload(serde_json::json!({"n": 2}));
        assert_eq!(a.envelope_id(), b.envelope_id());
    }

    #[test]
    fn test_page_item_descriptor() {
        let ts = "2025-10-15T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let env = NewEnvelope::page_item(Source::Missive, "E7", Some(ts));
        assert_eq!(env.kind, EnvelopeKind::PageItem);
        assert_eq!(env.payload["external_id"], "E7");
        assert_eq!(env.payload["updated_at"], "2025-10-15T12:00:00+00:00");
    }

    #[test]
    fn test_page_item_without_timestamp() {
        let env = NewEnvelope::page_item(Source::Craft, "doc-1", None);
        assert!(env.payload["updated_at"].is_null());
    }

    #[test]
    fn test_record_batch_extend_and_len() {
        let mut batch = RecordBatch::default();
        assert!(batch.is_empty());

        batch.tasks.push(TaskRecord {
            task_id: "1".into(),
            ..Default::default()
        });
        let mut other = RecordBatch::default();
        other.deletions.push((Source::Missive, "m1".into()));
        batch.extend(other);

        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }
}
