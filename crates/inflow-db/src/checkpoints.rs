//! Checkpoint repository: per-source poll high-water marks.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use inflow_core::{Checkpoint, CheckpointRepository, Error, Result, Source};

/// PostgreSQL implementation of [`CheckpointRepository`].
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn get(&self, source: Source) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT last_event_time, last_cursor FROM checkpoints WHERE source = $1",
        )
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| Checkpoint {
            source,
            last_event_time: r.get("last_event_time"),
            last_cursor: r.get("last_cursor"),
        }))
    }

    async fn set(&self, checkpoint: &Checkpoint) -> Result<()> {
        // GREATEST keeps last_event_time monotonic even if a slow cycle
        // finishes after a faster one already advanced the mark.
        sqlx::query(
            "INSERT INTO checkpoints (source, last_event_time, last_cursor, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (source) DO UPDATE SET
                 last_event_time = GREATEST(checkpoints.last_event_time, EXCLUDED.last_event_time),
                 last_cursor = EXCLUDED.last_cursor,
                 updated_at = now()",
        )
        .bind(checkpoint.source.as_str())
        .bind(checkpoint.last_event_time)
        .bind(&checkpoint.last_cursor)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
