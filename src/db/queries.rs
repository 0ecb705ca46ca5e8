use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{StoreError, TaskStore, Transition};
use crate::models::task::{Task, TaskStatus, TaskUpdate};

const TASK_COLUMNS: &str = "id, owner, status, raw_location, result_location, error, \
                            attempt, started_at, created_at, updated_at";

/// PostgreSQL-backed [`TaskStore`].
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolve a conditional write: the returned row if it applied, otherwise
    /// whatever the record looks like now.
    async fn resolve(
        &self,
        owner: &str,
        id: Uuid,
        row: Option<PgRow>,
    ) -> Result<Transition, StoreError> {
        if let Some(row) = row {
            return Ok(Transition::Applied(task_from_row(&row)?));
        }

        Ok(match self.get(owner, id).await? {
            Some(task) => Transition::Rejected(task),
            None => Transition::Missing,
        })
    }
}

fn task_from_row(row: &PgRow) -> Result<Task, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = TaskStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;

    Ok(Task {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        status,
        raw_location: row.try_get("raw_location")?,
        result_location: row.try_get("result_location")?,
        error: row.try_get("error")?,
        attempt: row.try_get("attempt")?,
        started_at: row.try_get("started_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, owner, status, raw_location, result_location, error,
                               attempt, started_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(task.id)
        .bind(&task.owner)
        .bind(task.status.to_string())
        .bind(&task.raw_location)
        .bind(&task.result_location)
        .bind(&task.error)
        .bind(task.attempt)
        .bind(task.started_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, owner: &str, id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE owner = $1 AND id = $2"
        ))
        .bind(owner)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(task_from_row).transpose()?)
    }

    async fn list(&self, owner: &str) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE owner = $1 ORDER BY seq ASC"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(task_from_row).collect::<Result<_, _>>()?)
    }

    async fn transition(
        &self,
        owner: &str,
        id: Uuid,
        expected: &[TaskStatus],
        update: TaskUpdate,
    ) -> Result<Transition, StoreError> {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();

        // Single conditional UPDATE: the status check and the write cannot interleave
        // with another transition on the same row.
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = $1,
                result_location = $2,
                error = $3,
                attempt = COALESCE($4::uuid, attempt),
                started_at = CASE WHEN $4::uuid IS NULL THEN started_at ELSE NULL END,
                updated_at = NOW()
            WHERE owner = $5 AND id = $6 AND status = ANY($7)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(update.status.to_string())
        .bind(&update.result_location)
        .bind(&update.error)
        .bind(update.attempt)
        .bind(owner)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve(owner, id, row).await
    }

    async fn start_run(
        &self,
        owner: &str,
        id: Uuid,
        attempt: Uuid,
    ) -> Result<Transition, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET started_at = NOW(),
                updated_at = NOW()
            WHERE owner = $1 AND id = $2
              AND status = 'processing' AND attempt = $3 AND started_at IS NULL
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(owner)
        .bind(id)
        .bind(attempt)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve(owner, id, row).await
    }

    async fn settle_run(
        &self,
        owner: &str,
        id: Uuid,
        attempt: Uuid,
        update: TaskUpdate,
    ) -> Result<Transition, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = $1,
                result_location = $2,
                error = $3,
                updated_at = NOW()
            WHERE owner = $4 AND id = $5 AND status = 'processing' AND attempt = $6
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(update.status.to_string())
        .bind(&update.result_location)
        .bind(&update.error)
        .bind(owner)
        .bind(id)
        .bind(attempt)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve(owner, id, row).await
    }

    async fn delete(
        &self,
        owner: &str,
        id: Uuid,
        expected: &[TaskStatus],
    ) -> Result<Transition, StoreError> {
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();

        let row = sqlx::query(&format!(
            r#"
            DELETE FROM tasks
            WHERE owner = $1 AND id = $2 AND status = ANY($3)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(owner)
        .bind(id)
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        self.resolve(owner, id, row).await
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        queued_before: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result_location = NULL,
                error = $1,
                updated_at = NOW()
            WHERE status = 'processing'
              AND ((started_at IS NOT NULL AND started_at < $2)
                   OR (started_at IS NULL AND updated_at < $3))
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(error)
        .bind(started_before)
        .bind(queued_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(task_from_row).collect::<Result<_, _>>()?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
