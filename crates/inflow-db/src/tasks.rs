//! Canonical task storage.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use inflow_core::{Error, Result, TaskRecord};

/// Read access to canonical tasks (writes go through the sink transaction).
pub struct PgTaskRepository {
    pool: PgPool,
}

impl PgTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(
            "SELECT task_id, project_id, title, description, status, tag_ids, tag_names,
                    assignee_ids, assignee_names, creator_id, creator_name, updater_id,
                    updater_name, due_at, created_at, updated_at, deleted, deleted_at
             FROM tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(parse_row))
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

fn parse_row(row: PgRow) -> TaskRecord {
    TaskRecord {
        task_id: row.get("task_id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        tag_ids: row.get("tag_ids"),
        tag_names: row.get("tag_names"),
        assignee_ids: row.get("assignee_ids"),
        assignee_names: row.get("assignee_names"),
        creator_id: row.get("creator_id"),
        creator_name: row.get("creator_name"),
        updater_id: row.get("updater_id"),
        updater_name: row.get("updater_name"),
        due_at: row.get("due_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted: row.get("deleted"),
        deleted_at: row.get("deleted_at"),
    }
}

/// Merge-upsert one task. Fields absent from the record (None / empty
/// lists) leave the stored values untouched; `deleted` always follows the
/// record so later updates win.
pub(crate) async fn upsert(conn: &mut PgConnection, task: &TaskRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO tasks
             (task_id, project_id, title, description, status, tag_ids, tag_names,
              assignee_ids, assignee_names, creator_id, creator_name, updater_id,
              updater_name, due_at, created_at, updated_at, deleted, deleted_at,
              db_updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                 $17, $18, now())
         ON CONFLICT (task_id) DO UPDATE SET
             project_id = COALESCE(EXCLUDED.project_id, tasks.project_id),
             title = COALESCE(EXCLUDED.title, tasks.title),
             description = COALESCE(EXCLUDED.description, tasks.description),
             status = COALESCE(EXCLUDED.status, tasks.status),
             tag_ids = CASE WHEN EXCLUDED.tag_ids = '{}' THEN tasks.tag_ids
                            ELSE EXCLUDED.tag_ids END,
             tag_names = CASE WHEN EXCLUDED.tag_names = '{}' THEN tasks.tag_names
                              ELSE EXCLUDED.tag_names END,
             assignee_ids = CASE WHEN EXCLUDED.assignee_ids = '{}' THEN tasks.assignee_ids
                                 ELSE EXCLUDED.assignee_ids END,
             assignee_names = CASE WHEN EXCLUDED.assignee_names = '{}' THEN tasks.assignee_names
                                   ELSE EXCLUDED.assignee_names END,
             creator_id = COALESCE(EXCLUDED.creator_id, tasks.creator_id),
             creator_name = COALESCE(EXCLUDED.creator_name, tasks.creator_name),
             updater_id = COALESCE(EXCLUDED.updater_id, tasks.updater_id),
             updater_name = COALESCE(EXCLUDED.updater_name, tasks.updater_name),
             due_at = COALESCE(EXCLUDED.due_at, tasks.due_at),
             created_at = COALESCE(EXCLUDED.created_at, tasks.created_at),
             updated_at = COALESCE(EXCLUDED.updated_at, tasks.updated_at),
             deleted = EXCLUDED.deleted,
             deleted_at = COALESCE(EXCLUDED.deleted_at, tasks.deleted_at),
             db_updated_at = now()",
    )
    .bind(&task.task_id)
    .bind(&task.project_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(&task.status)
    .bind(&task.tag_ids)
    .bind(&task.tag_names)
    .bind(&task.assignee_ids)
    .bind(&task.assignee_names)
    .bind(&task.creator_id)
    .bind(&task.creator_name)
    .bind(&task.updater_id)
    .bind(&task.updater_name)
    .bind(task.due_at)
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(task.deleted)
    .bind(task.deleted_at)
    .execute(conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

/// Soft-delete one task, creating a tombstone row if the task was never
/// stored. `deleted_at` is only set once.
pub(crate) async fn mark_deleted(
    conn: &mut PgConnection,
    task_id: &str,
    deleted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO tasks (task_id, deleted, deleted_at, db_updated_at)
         VALUES ($1, true, $2, now())
         ON CONFLICT (task_id) DO UPDATE SET
             deleted = true,
             deleted_at = COALESCE(tasks.deleted_at, EXCLUDED.deleted_at),
             db_updated_at = now()",
    )
    .bind(task_id)
    .bind(deleted_at)
    .execute(conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}
