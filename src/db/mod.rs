use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::task::{Task, TaskStatus, TaskUpdate};

pub mod memory;
pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Outcome of a conditional status change.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The task was in an expected state; holds the updated record.
    Applied(Task),
    /// The task exists but was in another state; holds the unchanged record.
    Rejected(Task),
    /// No task matches `(owner, id)`.
    Missing,
}

/// Durable task records, always addressed by `(owner, id)`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), StoreError>;

    async fn get(&self, owner: &str, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// All tasks of `owner` in creation order.
    async fn list(&self, owner: &str) -> Result<Vec<Task>, StoreError>;

    /// Atomically apply `update` if the current status is one of `expected`.
    async fn transition(
        &self,
        owner: &str,
        id: Uuid,
        expected: &[TaskStatus],
        update: TaskUpdate,
    ) -> Result<Transition, StoreError>;

    /// Claim run `attempt` for execution by stamping `started_at`.
    ///
    /// Applies only while the task is `Processing` under that attempt and the run
    /// has not been started yet, so each admitted run executes at most once.
    async fn start_run(&self, owner: &str, id: Uuid, attempt: Uuid)
        -> Result<Transition, StoreError>;

    /// Apply `update` only while the task is still `Processing` under `attempt`.
    async fn settle_run(
        &self,
        owner: &str,
        id: Uuid,
        attempt: Uuid,
        update: TaskUpdate,
    ) -> Result<Transition, StoreError>;

    /// Remove the record if its status is one of `expected`.
    /// `Applied` holds the removed record.
    async fn delete(
        &self,
        owner: &str,
        id: Uuid,
        expected: &[TaskStatus],
    ) -> Result<Transition, StoreError>;

    /// Fail `Processing` tasks whose run started before `started_before`, or that
    /// have been waiting unstarted since before `queued_before`.
    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        queued_before: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<Task>, StoreError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Task store unavailable: {0}")]
    Unavailable(String),
}
