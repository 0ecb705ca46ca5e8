use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;
use uuid::Uuid;

use crate::db::{StoreError, TaskStore, Transition};
use crate::models::task::{Task, TaskStatus, TaskUpdate};

/// In-process [`TaskStore`] for tests and local runs.
///
/// Records are kept in insertion order. Every transition takes the write lock, so
/// the status check and the update are a single step.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<Vec<Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a task's clocks back to `at`, for exercising the stale-run reaper.
    /// `started_at` is only moved if the run has started.
    pub fn backdate(&self, id: Uuid, at: DateTime<Utc>) {
        if let Ok(mut tasks) = self.tasks.write() {
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                task.updated_at = at;
                if task.started_at.is_some() {
                    task.started_at = Some(at);
                }
            }
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("task store lock poisoned".to_string())
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::Unavailable(format!("duplicate task id {}", task.id)));
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn get(&self, owner: &str, id: Uuid) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(poisoned)?;
        Ok(tasks
            .iter()
            .find(|t| t.id == id && t.owner == owner)
            .cloned())
    }

    async fn list(&self, owner: &str) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().map_err(poisoned)?;
        Ok(tasks.iter().filter(|t| t.owner == owner).cloned().collect())
    }

    async fn transition(
        &self,
        owner: &str,
        id: Uuid,
        expected: &[TaskStatus],
        update: TaskUpdate,
    ) -> Result<Transition, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id && t.owner == owner) else {
            return Ok(Transition::Missing);
        };

        if !expected.contains(&task.status) {
            return Ok(Transition::Rejected(task.clone()));
        }

        update.apply(task);
        Ok(Transition::Applied(task.clone()))
    }

    async fn start_run(
        &self,
        owner: &str,
        id: Uuid,
        attempt: Uuid,
    ) -> Result<Transition, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id && t.owner == owner) else {
            return Ok(Transition::Missing);
        };

        if !is_current_run(task, attempt) || task.started_at.is_some() {
            return Ok(Transition::Rejected(task.clone()));
        }

        let now = Utc::now();
        task.started_at = Some(now);
        task.updated_at = now;
        Ok(Transition::Applied(task.clone()))
    }

    async fn settle_run(
        &self,
        owner: &str,
        id: Uuid,
        attempt: Uuid,
        update: TaskUpdate,
    ) -> Result<Transition, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let Some(task) = tasks.iter_mut().find(|t| t.id == id && t.owner == owner) else {
            return Ok(Transition::Missing);
        };

        if !is_current_run(task, attempt) {
            return Ok(Transition::Rejected(task.clone()));
        }

        TaskUpdate { attempt: None, ..update }.apply(task);
        Ok(Transition::Applied(task.clone()))
    }

    async fn delete(
        &self,
        owner: &str,
        id: Uuid,
        expected: &[TaskStatus],
    ) -> Result<Transition, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let Some(index) = tasks.iter().position(|t| t.id == id && t.owner == owner) else {
            return Ok(Transition::Missing);
        };

        if !expected.contains(&tasks[index].status) {
            return Ok(Transition::Rejected(tasks[index].clone()));
        }

        Ok(Transition::Applied(tasks.remove(index)))
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        queued_before: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.tasks.write().map_err(poisoned)?;
        let update = TaskUpdate::failed(TaskStatus::Failed, error);

        let mut reaped = Vec::new();
        for task in tasks.iter_mut().filter(|t| {
            t.status == TaskStatus::Processing
                && match t.started_at {
                    Some(started) => started < started_before,
                    None => t.updated_at < queued_before,
                }
        }) {
            update.apply(task);
            reaped.push(task.clone());
        }
        Ok(reaped)
    }
}

fn is_current_run(task: &Task, attempt: Uuid) -> bool {
    task.status == TaskStatus::Processing && task.attempt == Some(attempt)
}
