//! Canonical email storage.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use inflow_core::{Attachment, EmailRecord, Error, Result};

/// Read access to canonical emails (writes go through the sink transaction).
pub struct PgEmailRepository {
    pool: PgPool,
}

impl PgEmailRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, email_id: &str) -> Result<Option<EmailRecord>> {
        let row = sqlx::query(
            "SELECT email_id, thread_id, subject, from_address, to_addresses, cc_addresses,
                    bcc_addresses, body_text, body_html, sent_at, received_at, labels,
                    deleted, deleted_at
             FROM emails WHERE email_id = $1",
        )
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else { return Ok(None) };
        let mut email = parse_row(row);

        let attachment_rows = sqlx::query(
            "SELECT filename, content_type, byte_size, source_url
             FROM email_attachments WHERE email_id = $1 ORDER BY id",
        )
        .bind(email_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        email.attachments = attachment_rows
            .into_iter()
            .map(|r| Attachment {
                filename: r.get("filename"),
                content_type: r.get("content_type"),
                byte_size: r.get("byte_size"),
                source_url: r.get("source_url"),
            })
            .collect();

        Ok(Some(email))
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM emails")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

fn parse_row(row: PgRow) -> EmailRecord {
    EmailRecord {
        email_id: row.get("email_id"),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        from_address: row.get("from_address"),
        to_addresses: row.get("to_addresses"),
        cc_addresses: row.get("cc_addresses"),
        bcc_addresses: row.get("bcc_addresses"),
        body_text: row.get("body_text"),
        body_html: row.get("body_html"),
        sent_at: row.get("sent_at"),
        received_at: row.get("received_at"),
        labels: row.get("labels"),
        attachments: Vec::new(),
        deleted: row.get("deleted"),
        deleted_at: row.get("deleted_at"),
    }
}

/// Merge-upsert one email plus its attachment metadata.
pub(crate) async fn upsert(conn: &mut PgConnection, email: &EmailRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO emails
             (email_id, thread_id, subject, from_address, to_addresses, cc_addresses,
              bcc_addresses, body_text, body_html, sent_at, received_at, labels,
              deleted, deleted_at, db_updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
         ON CONFLICT (email_id) DO UPDATE SET
             thread_id = COALESCE(EXCLUDED.thread_id, emails.thread_id),
             subject = COALESCE(EXCLUDED.subject, emails.subject),
             from_address = COALESCE(EXCLUDED.from_address, emails.from_address),
             to_addresses = CASE WHEN EXCLUDED.to_addresses = '{}' THEN emails.to_addresses
                                 ELSE EXCLUDED.to_addresses END,
             cc_addresses = CASE WHEN EXCLUDED.cc_addresses = '{}' THEN emails.cc_addresses
                                 ELSE EXCLUDED.cc_addresses END,
             bcc_addresses = CASE WHEN EXCLUDED.bcc_addresses = '{}' THEN emails.bcc_addresses
                                  ELSE EXCLUDED.bcc_addresses END,
             body_text = COALESCE(EXCLUDED.body_text, emails.body_text),
             body_html = COALESCE(EXCLUDED.body_html, emails.body_html),
             sent_at = COALESCE(EXCLUDED.sent_at, emails.sent_at),
             received_at = COALESCE(EXCLUDED.received_at, emails.received_at),
             labels = CASE WHEN EXCLUDED.labels = '{}' THEN emails.labels
                           ELSE EXCLUDED.labels END,
             deleted = EXCLUDED.deleted,
             deleted_at = COALESCE(EXCLUDED.deleted_at, emails.deleted_at),
             db_updated_at = now()",
    )
    .bind(&email.email_id)
    .bind(&email.thread_id)
    .bind(&email.subject)
    .bind(&email.from_address)
    .bind(&email.to_addresses)
    .bind(&email.cc_addresses)
    .bind(&email.bcc_addresses)
    .bind(&email.body_text)
    .bind(&email.body_html)
    .bind(email.sent_at)
    .bind(email.received_at)
    .bind(&email.labels)
    .bind(email.deleted)
    .bind(email.deleted_at)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    // Attachment metadata is a set owned by the message; replace it whole.
    if !email.attachments.is_empty() {
        sqlx::query("DELETE FROM email_attachments WHERE email_id = $1")
            .bind(&email.email_id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;

        for attachment in &email.attachments {
            sqlx::query(
                "INSERT INTO email_attachments
                     (email_id, filename, content_type, byte_size, source_url)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (email_id, source_url) DO NOTHING",
            )
            .bind(&email.email_id)
            .bind(&attachment.filename)
            .bind(&attachment.content_type)
            .bind(attachment.byte_size)
            .bind(&attachment.source_url)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
        }
    }

    Ok(())
}

/// Soft-delete one email, creating a tombstone row if needed.
pub(crate) async fn mark_deleted(
    conn: &mut PgConnection,
    email_id: &str,
    deleted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO emails (email_id, deleted, deleted_at, db_updated_at)
         VALUES ($1, true, $2, now())
         ON CONFLICT (email_id) DO UPDATE SET
             deleted = true,
             deleted_at = COALESCE(emails.deleted_at, EXCLUDED.deleted_at),
             db_updated_at = now()",
    )
    .bind(email_id)
    .bind(deleted_at)
    .execute(conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}
