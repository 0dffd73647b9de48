//! Webhook body parsing: turn a raw inbound payload into a minimal queue
//! envelope without touching any upstream API.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use inflow_core::{EnvelopeKind, Error, NewEnvelope, Result, Source};

/// Parse a webhook body for `source` into an envelope.
///
/// Teamwork delivers form-encoded bodies; Missive delivers JSON in
/// conversation, message, or trash shape. Craft has no webhooks.
pub fn parse_webhook(source: Source, body: &[u8]) -> Result<NewEnvelope> {
    match source {
        Source::Teamwork => parse_teamwork(body),
        Source::Missive => parse_missive(body),
        Source::Craft => Err(Error::InvalidInput(
            "craft is poll-only and accepts no webhooks".into(),
        )),
    }
}

fn parse_teamwork(body: &[u8]) -> Result<NewEnvelope> {
    let fields: HashMap<String, String> = serde_urlencoded::from_bytes(body)
        .map_err(|e| Error::MalformedPayload(format!("not form-encoded: {e}")))?;

    let task_id = fields
        .get("Task.ID")
        .or_else(|| fields.get("ID"))
        .or_else(|| fields.get("Task.Id"))
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| Error::MalformedPayload("no task id in webhook body".into()))?;

    let event = fields
        .get("Event")
        .or_else(|| fields.get("event"))
        .cloned()
        .unwrap_or_default();
    let kind = if event.to_ascii_lowercase().contains("deleted") {
        EnvelopeKind::Delete
    } else {
        EnvelopeKind::CreateOrUpdate
    };

    let payload = serde_json::to_value(&fields)?;
    Ok(NewEnvelope::new(Source::Teamwork, kind, task_id).with_payload(payload))
}

fn parse_missive(body: &[u8]) -> Result<NewEnvelope> {
    let payload: JsonValue = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedPayload(format!("not JSON: {e}")))?;

    let conversation_id = extract_missive_conversation_id(&payload).ok_or_else(|| {
        Error::MalformedPayload("no conversation id in webhook body".into())
    })?;

    let event = payload
        .get("event")
        .or_else(|| payload.get("type"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_ascii_lowercase();
    let kind = if event.contains("trash") || event.contains("delet") {
        EnvelopeKind::Delete
    } else {
        EnvelopeKind::CreateOrUpdate
    };

    Ok(NewEnvelope::new(Source::Missive, kind, conversation_id).with_payload(payload))
}

/// The conversation id, wherever the payload shape put it: a conversation
/// object, a top-level field, or inside a message object.
fn extract_missive_conversation_id(payload: &JsonValue) -> Option<String> {
    if let Some(id) = payload
        .pointer("/conversation/id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return Some(id.to_string());
    }
    for key in ["conversation_id", "conversationId"] {
        if let Some(id) = payload
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return Some(id.to_string());
        }
    }
    if let Some(message) = payload.get("message") {
        for key in ["conversation_id", "conversationId"] {
            if let Some(id) = message
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            {
                return Some(id.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teamwork_update_form() {
        let body = b"Event=TASK.UPDATED&Task.ID=31211&Project.ID=902";
        let envelope = parse_webhook(Source::Teamwork, body).unwrap();

        assert_eq!(envelope.source, Source::Teamwork);
        assert_eq!(envelope.kind, EnvelopeKind::CreateOrUpdate);
        assert_eq!(envelope.external_id, "31211");
        assert_eq!(envelope.envelope_id(), "teamwork:31211:create_or_update");
        assert_eq!(envelope.payload["Event"], "TASK.UPDATED");
    }

    #[test]
    fn test_teamwork_delete_form() {
        let body = b"Event=TASK.DELETED&ID=777";
        let envelope = parse_webhook(Source::Teamwork, body).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Delete);
        assert_eq!(envelope.external_id, "777");
    }

    #[test]
    fn test_teamwork_missing_id_rejected() {
        let err = parse_webhook(Source::Teamwork, b"Event=TASK.UPDATED").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn test_missive_conversation_shape() {
        let body = serde_json::json!({
            "event": "incoming_email",
            "conversation": {"id": "conv-42", "subject": "Hello"}
        });
        let envelope =
            parse_webhook(Source::Missive, body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.external_id, "conv-42");
        assert_eq!(envelope.kind, EnvelopeKind::CreateOrUpdate);
    }

    #[test]
    fn test_missive_message_shape() {
        let body = serde_json::json!({
            "type": "incoming_email",
            "message": {"id": "msg-1", "conversation_id": "conv-9"}
        });
        let envelope =
            parse_webhook(Source::Missive, body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.external_id, "conv-9");
        assert_eq!(envelope.kind, EnvelopeKind::CreateOrUpdate);
    }

    #[test]
    fn test_missive_trash_shape() {
        let body = serde_json::json!({
            "event": "conversation_trashed",
            "conversation_id": "conv-13"
        });
        let envelope =
            parse_webhook(Source::Missive, body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::Delete);
        assert_eq!(envelope.envelope_id(), "missive:conv-13:delete");
    }

    #[test]
    fn test_missive_missing_conversation_rejected() {
        let err =
            parse_webhook(Source::Missive, br#"{"event":"incoming_email"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn test_missive_invalid_json_rejected() {
        let err = parse_webhook(Source::Missive, b"{not json").unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[test]
    fn test_craft_webhooks_rejected() {
        let err = parse_webhook(Source::Craft, b"{}").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
