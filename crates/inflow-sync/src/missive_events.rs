//! Missive event handler: fan a conversation out into one canonical email
//! per contained message.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use inflow_connectors::{id_string, parse_timestamp, MissiveClient};
use inflow_core::{
    Attachment, EmailRecord, Envelope, EnvelopeKind, Error, RecordBatch, Result, Source,
};

use crate::handler::{before_cutoff, EventHandler};

/// Handler for Missive envelopes. The envelope's external id is always a
/// conversation id; messages are hydrated per event.
pub struct MissiveEventHandler {
    client: Arc<MissiveClient>,
    process_after: Option<DateTime<Utc>>,
}

impl MissiveEventHandler {
    pub fn new(client: Arc<MissiveClient>, process_after: Option<DateTime<Utc>>) -> Self {
        Self {
            client,
            process_after,
        }
    }
}

#[async_trait]
impl EventHandler for MissiveEventHandler {
    fn source(&self) -> Source {
        Source::Missive
    }

    async fn handle(&self, envelope: &Envelope) -> Result<RecordBatch> {
        let mut batch = RecordBatch::default();
        let conversation_id = envelope.external_id.as_str();

        let messages = match self.client.get_conversation_messages(conversation_id).await {
            Ok(messages) => messages,
            Err(Error::Gone(_)) => {
                // Conversation vanished before we could enumerate messages;
                // nothing stored under it can be addressed individually.
                warn!(
                    source = "missive",
                    external_id = conversation_id,
                    op = "handle",
                    "Conversation gone upstream, nothing to mark"
                );
                return Ok(batch);
            }
            Err(e) => return Err(e),
        };

        if envelope.kind == EnvelopeKind::Delete {
            // Trash applies to every message in the conversation.
            for message in &messages {
                if let Some(message_id) = message.get("id").and_then(id_string) {
                    batch.deletions.push((Source::Missive, message_id));
                }
            }
            return Ok(batch);
        }

        let mut seen: HashSet<String> = HashSet::new();
        for message in &messages {
            let Some(email) = parse_message(message, conversation_id) else {
                continue;
            };
            // Conversation payloads can repeat a message; one record each.
            if !seen.insert(email.email_id.clone()) {
                continue;
            }
            if before_cutoff(email.received_at, self.process_after) {
                debug!(
                    source = "missive",
                    external_id = %email.email_id,
                    op = "handle",
                    "Message predates cutoff, acknowledged without storing"
                );
                continue;
            }
            batch.emails.push(email);
        }

        Ok(batch)
    }
}

/// Parse one Missive message body into a canonical email.
fn parse_message(message: &JsonValue, conversation_id: &str) -> Option<EmailRecord> {
    let email_id = message.get("id").and_then(id_string)?;

    let sent_at = message
        .get("delivered_at")
        .or_else(|| message.get("created_at"))
        .and_then(parse_timestamp);
    let received_at = message
        .get("received_at")
        .and_then(parse_timestamp)
        .or(sent_at);

    let trashed = message
        .get("trashed")
        .or_else(|| message.get("deleted"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let deleted_at = trashed
        .then(|| message.get("trashed_at").and_then(parse_timestamp))
        .flatten();

    Some(EmailRecord {
        email_id,
        thread_id: Some(conversation_id.to_string()),
        subject: message
            .get("subject")
            .and_then(|v| v.as_str())
            .map(String::from),
        from_address: message
            .get("from_field")
            .or_else(|| message.get("from"))
            .and_then(single_address),
        to_addresses: address_list(message.get("to_fields").or_else(|| message.get("to"))),
        cc_addresses: address_list(message.get("cc_fields").or_else(|| message.get("cc"))),
        bcc_addresses: address_list(message.get("bcc_fields").or_else(|| message.get("bcc"))),
        body_text: message
            .get("preview")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        body_html: message
            .get("body")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from),
        sent_at,
        received_at,
        labels: label_list(message.get("labels")),
        attachments: attachment_list(message.get("attachments")),
        deleted: trashed,
        deleted_at,
    })
}

/// Coerce one address value (object or string) to canonical `user@host`.
fn single_address(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Object(_) => value
            .get("address")
            .or_else(|| value.get("email"))
            .and_then(|v| v.as_str())
            .and_then(normalize_address),
        JsonValue::String(s) => normalize_address(s),
        _ => None,
    }
}

fn address_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items.iter().filter_map(single_address).collect(),
        Some(other) => single_address(other).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Canonical `user@host`: lowercased, display-name and angle brackets
/// stripped.
fn normalize_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let inner = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    let addr = inner.trim().to_ascii_lowercase();
    if addr.contains('@') && !addr.contains(' ') {
        Some(addr)
    } else {
        None
    }
}

fn label_list(value: Option<&JsonValue>) -> Vec<String> {
    value
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|label| match label {
                    JsonValue::Object(_) => label
                        .get("name")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    JsonValue::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn attachment_list(value: Option<&JsonValue>) -> Vec<Attachment> {
    value
        .and_then(JsonValue::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|att| {
                    let source_url = att
                        .get("url")
                        .or_else(|| att.get("download_url"))
                        .and_then(|v| v.as_str())?
                        .to_string();
                    Some(Attachment {
                        filename: att
                            .get("filename")
                            .or_else(|| att.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_string(),
                        content_type: att
                            .get("media_type")
                            .or_else(|| att.get("content_type"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("application/octet-stream")
                            .to_string(),
                        byte_size: att.get("size").and_then(|v| v.as_i64()).unwrap_or(0),
                        source_url,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}
