//! Teamwork event handler: hydrate a task, resolve ids to names, emit one
//! canonical task record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use inflow_connectors::{id_string, parse_timestamp, IdentityCache, TeamworkClient};
use inflow_core::{Envelope, EnvelopeKind, Error, RecordBatch, Result, Source, TaskRecord};

use crate::handler::{before_cutoff, EventHandler};

/// Handler for Teamwork envelopes.
pub struct TeamworkEventHandler {
    client: Arc<TeamworkClient>,
    identity: Arc<IdentityCache>,
    process_after: Option<DateTime<Utc>>,
}

impl TeamworkEventHandler {
    pub fn new(
        client: Arc<TeamworkClient>,
        identity: Arc<IdentityCache>,
        process_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            client,
            identity,
            process_after,
        }
    }

    /// Build the canonical record, resolving people and tag ids through the
    /// identity cache. Inline names in the payload win over the cache.
    async fn to_record(&self, task: &JsonValue) -> TaskRecord {
        let fields = extract_task_fields(task);

        let mut tag_names = Vec::with_capacity(fields.tag_ids.len());
        for id in &fields.tag_ids {
            match fields.inline_tag_names.get(id) {
                Some(name) => tag_names.push(name.clone()),
                None => tag_names.push(self.identity.tag_name(id).await),
            }
        }

        let mut assignee_names = Vec::with_capacity(fields.assignee_ids.len());
        for id in &fields.assignee_ids {
            match fields.inline_assignee_names.get(id) {
                Some(name) => assignee_names.push(name.clone()),
                None => assignee_names.push(self.identity.person_name(id).await),
            }
        }

        let creator_name = match &fields.record.creator_id {
            Some(id) => Some(self.identity.person_name(id).await),
            None => None,
        };
        let updater_name = match &fields.record.updater_id {
            Some(id) => Some(self.identity.person_name(id).await),
            None => None,
        };

        TaskRecord {
            tag_ids: fields.tag_ids,
            tag_names,
            assignee_ids: fields.assignee_ids,
            assignee_names,
            creator_name,
            updater_name,
            ..fields.record
        }
    }
}

#[async_trait]
impl EventHandler for TeamworkEventHandler {
    fn source(&self) -> Source {
        Source::Teamwork
    }

    async fn handle(&self, envelope: &Envelope) -> Result<RecordBatch> {
        let mut batch = RecordBatch::default();
        let task_id = envelope.external_id.as_str();

        if envelope.kind == EnvelopeKind::Delete {
            batch
                .deletions
                .push((Source::Teamwork, task_id.to_string()));
            return Ok(batch);
        }

        self.identity.refresh_if_stale(&self.client).await;

        let task = match snapshot_from_payload(&envelope.payload) {
            Some(snapshot) => snapshot,
            None => match self.client.get_task(task_id).await {
                Ok(task) => task,
                Err(Error::Gone(_)) => {
                    // The task vanished between event and hydration.
                    debug!(
                        source = "teamwork",
                        external_id = task_id,
                        op = "handle",
                        "Task gone upstream, soft-deleting"
                    );
                    batch
                        .deletions
                        .push((Source::Teamwork, task_id.to_string()));
                    return Ok(batch);
                }
                Err(e) => return Err(e),
            },
        };

        let record = self.to_record(&task).await;

        if before_cutoff(record.created_at, self.process_after) {
            debug!(
                source = "teamwork",
                external_id = task_id,
                op = "handle",
                "Task predates cutoff, acknowledged without storing"
            );
            return Ok(batch);
        }

        batch.tasks.push(record);
        Ok(batch)
    }
}

/// A webhook body that already carries a full task snapshot, when present.
/// A snapshot is sufficient if it has at least an id and a name.
fn snapshot_from_payload(payload: &JsonValue) -> Option<JsonValue> {
    let task = payload.get("task")?;
    task.get("id")?;
    task.get("name")?;
    Some(task.clone())
}

struct TaskFields {
    record: TaskRecord,
    tag_ids: Vec<String>,
    assignee_ids: Vec<String>,
    inline_tag_names: HashMap<String, String>,
    inline_assignee_names: HashMap<String, String>,
}

/// Pull the id-level fields out of a Teamwork task body. Name resolution
/// happens later against the identity cache.
fn extract_task_fields(task: &JsonValue) -> TaskFields {
    let task_id = task.get("id").and_then(id_string).unwrap_or_default();

    let inline_tag_names = inline_names(task.get("tags"), "name");
    let mut tag_ids = extract_id_list(task.get("tagIds"));
    if tag_ids.is_empty() {
        tag_ids = inline_tag_names.keys().cloned().collect();
        tag_ids.sort();
    }

    let inline_assignee_names = inline_names(task.get("assignees"), "fullName");
    let mut assignee_ids = extract_id_list(task.get("assigneeUserIds"));
    if assignee_ids.is_empty() {
        assignee_ids = extract_id_list(task.get("assignees"));
    }

    // "Completed" is a status, not a deletion: only explicit delete events
    // or a 404 on hydration flip the deleted flag.
    let record = TaskRecord {
        task_id,
        project_id: task.get("projectId").and_then(id_string),
        title: task
            .get("name")
            .or_else(|| task.get("title"))
            .and_then(|v| v.as_str())
            .map(String::from),
        description: task
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        status: task
            .get("status")
            .or_else(|| task.get("state"))
            .and_then(|v| v.as_str())
            .map(String::from),
        creator_id: task.get("createdBy").and_then(id_string),
        updater_id: task.get("updatedBy").and_then(id_string),
        due_at: task.get("dueDate").and_then(parse_due_date),
        created_at: task.get("createdAt").and_then(parse_timestamp),
        updated_at: task.get("updatedAt").and_then(parse_timestamp),
        deleted: false,
        deleted_at: None,
        ..Default::default()
    };

    TaskFields {
        record,
        tag_ids,
        assignee_ids,
        inline_tag_names,
        inline_assignee_names,
    }
}

/// Ids from an array of numbers, strings, or objects with an `id` field.
fn extract_id_list(value: Option<&JsonValue>) -> Vec<String> {
    value
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| match item {
                    JsonValue::Object(_) => item.get("id").and_then(id_string),
                    other => id_string(other),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Id → display-name pairs from an array of objects carrying names inline.
fn inline_names(value: Option<&JsonValue>, name_key: &str) -> HashMap<String, String> {
    value
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let id = item.get("id").and_then(id_string)?;
                    let name = item
                        .get(name_key)
                        .or_else(|| item.get("name"))
                        .and_then(|v| v.as_str())?;
                    Some((id, name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Due dates arrive as RFC 3339, `YYYY-MM-DD`, or compact `YYYYMMDD`.
fn parse_due_date(value: &JsonValue) -> Option<DateTime<Utc>> {
    if let Some(ts) = parse_timestamp(value) {
        return Some(ts);
    }
    let s = value.as_str()?.trim();
    for format in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date.and_time(NaiveTime::MIN).and_utc());
        }
    }
    None
}
