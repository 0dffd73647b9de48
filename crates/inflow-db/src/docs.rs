//! Canonical document storage (Craft source).

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use inflow_core::{DocRecord, Error, Result};

/// Read access to canonical documents.
pub struct PgDocRepository {
    pool: PgPool,
}

impl PgDocRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, doc_id: &str) -> Result<Option<DocRecord>> {
        let row = sqlx::query(
            "SELECT doc_id, title, content, space_id, created_at, updated_at, deleted, deleted_at
             FROM docs WHERE doc_id = $1",
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| DocRecord {
            doc_id: r.get("doc_id"),
            title: r.get("title"),
            content: r.get("content"),
            space_id: r.get("space_id"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
            deleted: r.get("deleted"),
            deleted_at: r.get("deleted_at"),
        }))
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM docs")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

/// Merge-upsert one document.
pub(crate) async fn upsert(conn: &mut PgConnection, doc: &DocRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO docs
             (doc_id, title, content, space_id, created_at, updated_at, deleted, deleted_at,
              db_updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
         ON CONFLICT (doc_id) DO UPDATE SET
             title = COALESCE(EXCLUDED.title, docs.title),
             content = COALESCE(EXCLUDED.content, docs.content),
             space_id = COALESCE(EXCLUDED.space_id, docs.space_id),
             created_at = COALESCE(EXCLUDED.created_at, docs.created_at),
             updated_at = COALESCE(EXCLUDED.updated_at, docs.updated_at),
             deleted = EXCLUDED.deleted,
             deleted_at = COALESCE(EXCLUDED.deleted_at, docs.deleted_at),
             db_updated_at = now()",
    )
    .bind(&doc.doc_id)
    .bind(&doc.title)
    .bind(&doc.content)
    .bind(&doc.space_id)
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .bind(doc.deleted)
    .bind(doc.deleted_at)
    .execute(conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

/// Soft-delete one document, creating a tombstone row if needed.
pub(crate) async fn mark_deleted(
    conn: &mut PgConnection,
    doc_id: &str,
    deleted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO docs (doc_id, deleted, deleted_at, db_updated_at)
         VALUES ($1, true, $2, now())
         ON CONFLICT (doc_id) DO UPDATE SET
             deleted = true,
             deleted_at = COALESCE(docs.deleted_at, EXCLUDED.deleted_at),
             db_updated_at = now()",
    )
    .bind(doc_id)
    .bind(deleted_at)
    .execute(conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}
