//! Transactional record sink.
//!
//! `commit` is the crash-safety hinge of the whole pipeline: canonical
//! upserts, soft-deletes, and envelope retirement all ride one Postgres
//! transaction, so a crash at any point leaves either everything or
//! nothing, and a re-leased envelope replays onto idempotent upserts.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use inflow_core::{defaults, Error, RecordBatch, RecordSink, Result, Source};

use crate::{docs, emails, queue, tasks};

/// PostgreSQL implementation of [`RecordSink`].
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSink for PgSink {
    fn requires_attachment_bytes(&self) -> bool {
        // Attachment metadata plus source URL is enough for this sink.
        false
    }

    async fn commit(&self, batch: &RecordBatch, envelope_ids: &[i64]) -> Result<()> {
        if batch.is_empty() && envelope_ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for chunk in batch.tasks.chunks(defaults::SINK_BATCH_SIZE) {
            for task in chunk {
                tasks::upsert(&mut *tx, task).await?;
            }
        }
        for chunk in batch.emails.chunks(defaults::SINK_BATCH_SIZE) {
            for email in chunk {
                emails::upsert(&mut *tx, email).await?;
            }
        }
        for chunk in batch.docs.chunks(defaults::SINK_BATCH_SIZE) {
            for doc in chunk {
                docs::upsert(&mut *tx, doc).await?;
            }
        }

        for (source, external_id) in &batch.deletions {
            match source {
                Source::Teamwork => tasks::mark_deleted(&mut *tx, external_id, now).await?,
                Source::Missive => emails::mark_deleted(&mut *tx, external_id, now).await?,
                Source::Craft => docs::mark_deleted(&mut *tx, external_id, now).await?,
            }
        }

        queue::complete_in_tx(&mut *tx, envelope_ids).await?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            op = "sink_commit",
            item_count = batch.len(),
            retired = envelope_ids.len(),
            "Committed record batch"
        );
        Ok(())
    }
}
