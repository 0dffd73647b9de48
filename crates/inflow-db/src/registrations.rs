//! Webhook registration state: which registrations we own upstream.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use inflow_core::{Error, RegistrationRepository, Result, Source, WebhookRegistration};

/// PostgreSQL implementation of [`RegistrationRepository`].
pub struct PgRegistrationRepository {
    pool: PgPool,
}

impl PgRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistrationRepository for PgRegistrationRepository {
    async fn list_for_source(&self, source: Source) -> Result<Vec<WebhookRegistration>> {
        let rows = sqlx::query(
            "SELECT registration_id, target_url, event, created_at
             FROM webhook_registrations WHERE source = $1 ORDER BY id",
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| WebhookRegistration {
                source,
                registration_id: r.get("registration_id"),
                target_url: r.get("target_url"),
                event: r.get("event"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn replace_for_source(
        &self,
        source: Source,
        registrations: Vec<WebhookRegistration>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM webhook_registrations WHERE source = $1")
            .bind(source.as_str())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for registration in &registrations {
            sqlx::query(
                "INSERT INTO webhook_registrations
                     (source, registration_id, target_url, event, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(source.as_str())
            .bind(&registration.registration_id)
            .bind(&registration.target_url)
            .bind(&registration.event)
            .bind(registration.created_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
