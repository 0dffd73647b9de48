//! Idempotent schema bootstrap.
//!
//! All tables the connector persists to are created here with
//! `CREATE TABLE IF NOT EXISTS`, so a fresh database works without an
//! out-of-band migration step. Statements are additive only; existing data
//! is never touched.

use sqlx::PgPool;
use tracing::info;

use inflow_core::{Error, Result};

const STATEMENTS: &[&str] = &[
    // Durable work queue. (source, envelope_id) is the logical identity;
    // id is a surrogate used for leasing and retirement.
    "CREATE TABLE IF NOT EXISTS ingest_queue (
        id              BIGSERIAL PRIMARY KEY,
        envelope_id     TEXT NOT NULL,
        source          TEXT NOT NULL,
        kind            TEXT NOT NULL,
        external_id     TEXT NOT NULL,
        payload         JSONB NOT NULL DEFAULT 'null'::jsonb,
        attempts        INTEGER NOT NULL DEFAULT 0,
        state           TEXT NOT NULL DEFAULT 'pending'
                        CHECK (state IN ('pending', 'leased', 'completed', 'failed')),
        enqueued_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
        next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        leased_until    TIMESTAMPTZ,
        completed_at    TIMESTAMPTZ,
        last_error      TEXT,
        UNIQUE (source, envelope_id)
    )",
    "CREATE INDEX IF NOT EXISTS ingest_queue_lease_idx
        ON ingest_queue (source, state, next_attempt_at, enqueued_at)",
    // Per-source poll high-water marks.
    "CREATE TABLE IF NOT EXISTS checkpoints (
        source          TEXT PRIMARY KEY,
        last_event_time TIMESTAMPTZ NOT NULL,
        last_cursor     TEXT,
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    // Canonical Teamwork tasks.
    "CREATE TABLE IF NOT EXISTS tasks (
        task_id        TEXT PRIMARY KEY,
        project_id     TEXT,
        title          TEXT,
        description    TEXT,
        status         TEXT,
        tag_ids        TEXT[] NOT NULL DEFAULT '{}',
        tag_names      TEXT[] NOT NULL DEFAULT '{}',
        assignee_ids   TEXT[] NOT NULL DEFAULT '{}',
        assignee_names TEXT[] NOT NULL DEFAULT '{}',
        creator_id     TEXT,
        creator_name   TEXT,
        updater_id     TEXT,
        updater_name   TEXT,
        due_at         TIMESTAMPTZ,
        created_at     TIMESTAMPTZ,
        updated_at     TIMESTAMPTZ,
        deleted        BOOLEAN NOT NULL DEFAULT false,
        deleted_at     TIMESTAMPTZ,
        db_updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    // Canonical Missive emails.
    "CREATE TABLE IF NOT EXISTS emails (
        email_id      TEXT PRIMARY KEY,
        thread_id     TEXT,
        subject       TEXT,
        from_address  TEXT,
        to_addresses  TEXT[] NOT NULL DEFAULT '{}',
        cc_addresses  TEXT[] NOT NULL DEFAULT '{}',
        bcc_addresses TEXT[] NOT NULL DEFAULT '{}',
        body_text     TEXT,
        body_html     TEXT,
        sent_at       TIMESTAMPTZ,
        received_at   TIMESTAMPTZ,
        labels        TEXT[] NOT NULL DEFAULT '{}',
        deleted       BOOLEAN NOT NULL DEFAULT false,
        deleted_at    TIMESTAMPTZ,
        db_updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS emails_thread_idx ON emails (thread_id)",
    // Attachment metadata; bytes stay upstream, only the source URL is kept.
    "CREATE TABLE IF NOT EXISTS email_attachments (
        id            BIGSERIAL PRIMARY KEY,
        email_id      TEXT NOT NULL REFERENCES emails (email_id) ON DELETE CASCADE,
        filename      TEXT NOT NULL,
        content_type  TEXT NOT NULL,
        byte_size     BIGINT NOT NULL DEFAULT 0,
        source_url    TEXT NOT NULL,
        UNIQUE (email_id, source_url)
    )",
    // Canonical Craft documents.
    "CREATE TABLE IF NOT EXISTS docs (
        doc_id        TEXT PRIMARY KEY,
        title         TEXT,
        content       TEXT,
        space_id      TEXT,
        created_at    TIMESTAMPTZ,
        updated_at    TIMESTAMPTZ,
        deleted       BOOLEAN NOT NULL DEFAULT false,
        deleted_at    TIMESTAMPTZ,
        db_updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    // Webhook registrations we created upstream, per source.
    "CREATE TABLE IF NOT EXISTS webhook_registrations (
        id              BIGSERIAL PRIMARY KEY,
        source          TEXT NOT NULL,
        registration_id TEXT NOT NULL,
        target_url      TEXT NOT NULL,
        event           TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (source, registration_id)
    )",
];

/// Create every table and index the connector needs, if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .map_err(Error::Database)?;
    }
    info!(
        subsystem = "db",
        op = "ensure_schema",
        "Schema bootstrap complete"
    );
    Ok(())
}
