//! Craft event handler: hydrate a document and emit one canonical record.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use inflow_connectors::{id_string, parse_timestamp, CraftClient};
use inflow_core::{DocRecord, Envelope, Error, RecordBatch, Result, Source};

use crate::handler::EventHandler;

/// Handler for Craft envelopes. Craft has no webhooks, so every envelope
/// is a poller descriptor.
pub struct CraftEventHandler {
    client: Arc<CraftClient>,
}

impl CraftEventHandler {
    pub fn new(client: Arc<CraftClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventHandler for CraftEventHandler {
    fn source(&self) -> Source {
        Source::Craft
    }

    async fn handle(&self, envelope: &Envelope) -> Result<RecordBatch> {
        let mut batch = RecordBatch::default();
        let doc_id = envelope.external_id.as_str();

        let document = match self.client.get_document(doc_id).await {
            Ok(document) => document,
            Err(Error::Gone(_)) => {
                debug!(
                    source = "craft",
                    external_id = doc_id,
                    op = "handle",
                    "Document gone upstream, soft-deleting"
                );
                batch.deletions.push((Source::Craft, doc_id.to_string()));
                return Ok(batch);
            }
            Err(e) => return Err(e),
        };

        batch.docs.push(parse_document(&document, doc_id));
        Ok(batch)
    }
}

fn parse_document(document: &JsonValue, fallback_id: &str) -> DocRecord {
    DocRecord {
        doc_id: document
            .get("id")
            .and_then(id_string)
            .unwrap_or_else(|| fallback_id.to_string()),
        title: document
            .get("title")
            .and_then(|v| v.as_str())
            .map(String::from),
        content: document
            .get("content")
            .or_else(|| document.get("markdown"))
            .and_then(|v| v.as_str())
            .map(String::from),
        space_id: document
            .get("spaceId")
            .or_else(|| document.get("space_id"))
            .and_then(id_string),
        created_at: document.get("created_at").and_then(parse_timestamp),
        updated_at: document.get("updated_at").and_then(parse_timestamp),
        deleted: false,
        deleted_at: None,
    }
}
