//! Durable queue repository.
//!
//! One row per logical envelope. Leasing uses `FOR UPDATE SKIP LOCKED` so
//! concurrent workers never claim the same row; completion happens inside
//! the sink transaction (see `sink.rs`) so apply and retire are atomic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};

use inflow_core::{
    defaults, EnqueueOutcome, Envelope, EnvelopeState, Error, NewEnvelope, QueueRepository, Result,
    Source, SourceQueueStats,
};

const ENVELOPE_COLUMNS: &str = "id, envelope_id, source, kind, external_id, payload, attempts, \
                                state, enqueued_at, leased_until, last_error";

/// PostgreSQL implementation of [`QueueRepository`].
pub struct PgQueueRepository {
    pool: PgPool,
    max_attempts: i32,
    retry_delay: Duration,
    /// Wakes the dispatcher when new work arrives.
    notify: Arc<Notify>,
}

impl PgQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_attempts: defaults::MAX_QUEUE_ATTEMPTS,
            retry_delay: Duration::from_secs(defaults::SPOOL_RETRY_SECS),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Override the attempt cap and retry delay (from configuration).
    pub fn with_limits(mut self, max_attempts: i32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = retry_delay;
        self
    }

    /// Notification handle for event-driven dispatcher wake.
    pub fn work_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_row(row: PgRow) -> Result<Envelope> {
        let source: String = row.get("source");
        let kind: String = row.get("kind");
        let state: String = row.get("state");
        Ok(Envelope {
            id: row.get("id"),
            envelope_id: row.get("envelope_id"),
            source: source.parse()?,
            kind: kind.parse()?,
            external_id: row.get("external_id"),
            payload: row.get("payload"),
            attempts: row.get("attempts"),
            state: state.parse()?,
            enqueued_at: row.get("enqueued_at"),
            leased_until: row.get("leased_until"),
            last_error: row.get("last_error"),
        })
    }
}

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn enqueue(&self, envelope: NewEnvelope) -> Result<EnqueueOutcome> {
        let now = Utc::now();
        let envelope_id = envelope.envelope_id();

        // A pending or leased row with the same logical id absorbs the
        // re-delivery; a retired row is reset so a fresh upstream event for
        // the same id is never lost.
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO ingest_queue
                 (envelope_id, source, kind, external_id, payload, attempts, state,
                  enqueued_at, next_attempt_at)
             VALUES ($1, $2, $3, $4, $5, 0, 'pending', $6, $6)
             ON CONFLICT (source, envelope_id) DO UPDATE SET
                 state = 'pending',
                 payload = EXCLUDED.payload,
                 attempts = 0,
                 enqueued_at = EXCLUDED.enqueued_at,
                 next_attempt_at = EXCLUDED.next_attempt_at,
                 leased_until = NULL,
                 completed_at = NULL,
                 last_error = NULL
             WHERE ingest_queue.state IN ('completed', 'failed')
             RETURNING id",
        )
        .bind(&envelope_id)
        .bind(envelope.source.as_str())
        .bind(envelope.kind.as_str())
        .bind(&envelope.external_id)
        .bind(&envelope.payload)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match inserted {
            Some(_) => {
                debug!(
                    source = %envelope.source,
                    envelope_id = %envelope_id,
                    op = "enqueue",
                    "Enqueued"
                );
                self.notify.notify_waiters();
                Ok(EnqueueOutcome::Inserted)
            }
            None => {
                debug!(
                    source = %envelope.source,
                    envelope_id = %envelope_id,
                    op = "enqueue",
                    "Duplicate, already queued"
                );
                Ok(EnqueueOutcome::Duplicate)
            }
        }
    }

    async fn enqueue_batch(&self, envelopes: Vec<NewEnvelope>) -> Result<usize> {
        if envelopes.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut inserted = 0usize;

        for envelope in &envelopes {
            let row = sqlx::query_scalar::<_, i64>(
                "INSERT INTO ingest_queue
                     (envelope_id, source, kind, external_id, payload, attempts, state,
                      enqueued_at, next_attempt_at)
                 VALUES ($1, $2, $3, $4, $5, 0, 'pending', $6, $6)
                 ON CONFLICT (source, envelope_id) DO UPDATE SET
                     state = 'pending',
                     payload = EXCLUDED.payload,
                     attempts = 0,
                     enqueued_at = EXCLUDED.enqueued_at,
                     next_attempt_at = EXCLUDED.next_attempt_at,
                     leased_until = NULL,
                     completed_at = NULL,
                     last_error = NULL
                 WHERE ingest_queue.state IN ('completed', 'failed')
                 RETURNING id",
            )
            .bind(envelope.envelope_id())
            .bind(envelope.source.as_str())
            .bind(envelope.kind.as_str())
            .bind(&envelope.external_id)
            .bind(&envelope.payload)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

            if row.is_some() {
                inserted += 1;
            }
        }

        tx.commit().await.map_err(Error::Database)?;

        if inserted > 0 {
            self.notify.notify_waiters();
        }
        debug!(
            op = "enqueue_batch",
            item_count = envelopes.len(),
            inserted,
            "Enqueued page batch"
        );
        Ok(inserted)
    }

    async fn lease(
        &self,
        source: Source,
        batch_size: i64,
        lease_duration: Duration,
    ) -> Result<Vec<Envelope>> {
        let now = Utc::now();
        let leased_until = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| Error::InvalidInput(format!("lease duration out of range: {e}")))?;

        // Expired leases become eligible again, which is what recovers work
        // from a crashed worker. Attempts count leases, not failures, so a
        // hard kill still consumes attempt budget.
        let rows = sqlx::query(&format!(
            "UPDATE ingest_queue
             SET state = 'leased', leased_until = $1, attempts = attempts + 1
             WHERE id IN (
                 SELECT id FROM ingest_queue
                 WHERE source = $2
                   AND ((state = 'pending' AND next_attempt_at <= $3)
                        OR (state = 'leased' AND leased_until < $3))
                 ORDER BY enqueued_at ASC
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {ENVELOPE_COLUMNS}"
        ))
        .bind(leased_until)
        .bind(source.as_str())
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_row).collect()
    }

    async fn fail(&self, id: i64, error: &str, permanent: bool) -> Result<i32> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let attempts: i32 = sqlx::query_scalar("SELECT attempts FROM ingest_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::Queue(format!("envelope {id} not found")))?;

        if permanent || attempts >= self.max_attempts {
            sqlx::query(
                "UPDATE ingest_queue
                 SET state = 'failed', last_error = $1, leased_until = NULL, completed_at = $2
                 WHERE id = $3",
            )
            .bind(error)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            warn!(
                envelope_db_id = id,
                attempts,
                permanent,
                error,
                op = "fail",
                "Envelope moved to failed"
            );
        } else {
            let next_attempt = now
                + chrono::Duration::from_std(self.retry_delay)
                    .unwrap_or_else(|_| chrono::Duration::seconds(60));
            sqlx::query(
                "UPDATE ingest_queue
                 SET state = 'pending', last_error = $1, leased_until = NULL,
                     next_attempt_at = $2
                 WHERE id = $3",
            )
            .bind(error)
            .bind(next_attempt)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            debug!(
                envelope_db_id = id,
                attempts,
                error,
                op = "fail",
                "Envelope scheduled for retry"
            );
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(attempts)
    }

    async fn requeue_failed(&self, id: i64) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE ingest_queue
             SET state = 'pending', attempts = 0, next_attempt_at = $1,
                 leased_until = NULL, completed_at = NULL, last_error = NULL
             WHERE id = $2 AND state = 'failed'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let requeued = result.rows_affected() > 0;
        if requeued {
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }

    async fn list(
        &self,
        state: EnvelopeState,
        source: Option<Source>,
        limit: i64,
    ) -> Result<Vec<Envelope>> {
        let rows = match source {
            Some(source) => {
                sqlx::query(&format!(
                    "SELECT {ENVELOPE_COLUMNS} FROM ingest_queue
                     WHERE state = $1 AND source = $2
                     ORDER BY enqueued_at ASC
                     LIMIT $3"
                ))
                .bind(state.as_str())
                .bind(source.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ENVELOPE_COLUMNS} FROM ingest_queue
                     WHERE state = $1
                     ORDER BY enqueued_at ASC
                     LIMIT $2"
                ))
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_row).collect()
    }

    async fn stats(&self) -> Result<Vec<SourceQueueStats>> {
        let stuck_cutoff =
            Utc::now() - chrono::Duration::minutes(defaults::STUCK_THRESHOLD_MINUTES);

        let rows = sqlx::query(
            "SELECT
                source,
                COUNT(*) FILTER (WHERE state = 'pending') AS pending,
                COUNT(*) FILTER (WHERE state = 'leased') AS leased,
                COUNT(*) FILTER (WHERE state = 'completed') AS completed,
                COUNT(*) FILTER (WHERE state = 'failed') AS failed,
                EXTRACT(EPOCH FROM (now() - MIN(enqueued_at)
                    FILTER (WHERE state = 'pending')))::bigint AS oldest_pending_secs,
                COUNT(*) FILTER (WHERE state = 'leased' AND leased_until < $1) AS stuck
             FROM ingest_queue
             GROUP BY source
             ORDER BY source",
        )
        .bind(stuck_cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SourceQueueStats {
                source: row.get("source"),
                pending: row.get("pending"),
                leased: row.get("leased"),
                completed: row.get("completed"),
                failed: row.get("failed"),
                oldest_pending_secs: row.get("oldest_pending_secs"),
                stuck: row.get("stuck"),
            })
            .collect())
    }

    async fn cleanup_completed(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let result = sqlx::query(
            "DELETE FROM ingest_queue WHERE state = 'completed' AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

/// Mark envelopes completed inside an open sink transaction.
///
/// Kept out of the trait on purpose: retirement must share the sink's
/// transaction, never run on its own connection.
pub(crate) async fn complete_in_tx(
    tx: &mut sqlx::PgConnection,
    envelope_ids: &[i64],
) -> Result<()> {
    if envelope_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "UPDATE ingest_queue
         SET state = 'completed', completed_at = now(), leased_until = NULL
         WHERE id = ANY($1)",
    )
    .bind(envelope_ids)
    .execute(tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}
