use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::db::{TaskStore, Transition};
use crate::error::TaskError;
use crate::models::task::{Task, TaskStatus, TaskUpdate};
use crate::services::model::Predictor;
use crate::services::pipeline::{self, RunFailure, CSV_CONTENT_TYPE};
use crate::services::queue::{JobQueue, QueuedRun};
use crate::services::storage::{ObjectStore, StorageError};

/// Error recorded on tasks the reaper moves out of `Processing`.
pub const TIMEOUT_ERROR: &str = "processing timed out";

/// Tunables for the task lifecycle.
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    /// Lifetime of presigned upload URLs.
    pub upload_url_ttl: Duration,
    /// Upper bound on a single processing run, counted from when it starts.
    pub processing_timeout: Duration,
    /// How long an admitted run may wait in the queue before it is failed.
    pub queue_timeout: Duration,
    /// Whether `Failed` tasks may be processed again.
    pub allow_retry_failed: bool,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            upload_url_ttl: Duration::from_secs(8 * 60 * 60),
            processing_timeout: Duration::from_secs(600),
            queue_timeout: Duration::from_secs(60 * 60),
            allow_retry_failed: true,
        }
    }
}

/// A task together with a fresh presigned upload URL.
#[derive(Debug, Clone)]
pub struct UploadSlot {
    pub task: Task,
    pub upload_url: String,
}

/// Task state machine.
///
/// Every operation is scoped to `(owner, id)`; a task owned by someone else is
/// reported as [`TaskError::NotFound`].
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    storage: Arc<dyn ObjectStore>,
    predictor: Arc<dyn Predictor>,
    policy: TaskPolicy,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        storage: Arc<dyn ObjectStore>,
        predictor: Arc<dyn Predictor>,
        policy: TaskPolicy,
    ) -> Self {
        Self {
            store,
            storage,
            predictor,
            policy,
        }
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub fn policy(&self) -> &TaskPolicy {
        &self.policy
    }

    /// Create a task in `AwaitingUpload` and return its upload URL.
    ///
    /// The URL is requested first so a storage failure leaves no record behind.
    pub async fn issue(&self, owner: &str) -> Result<UploadSlot, TaskError> {
        let task = Task::new(Uuid::new_v4(), owner);
        let upload_url = self
            .storage
            .presign_upload(&task.raw_location, CSV_CONTENT_TYPE, self.policy.upload_url_ttl)
            .await?;

        self.store.insert(&task).await?;

        metrics::counter!("air_quality_tasks_issued_total").increment(1);
        tracing::info!(task_id = %task.id, owner = %owner, "Issued upload slot");

        Ok(UploadSlot { task, upload_url })
    }

    /// Fresh upload URL for a task whose previous one expired unused.
    pub async fn renew_upload(&self, owner: &str, id: Uuid) -> Result<UploadSlot, TaskError> {
        let task = self.get_status(owner, id).await?;
        if task.status != TaskStatus::AwaitingUpload {
            return Err(TaskError::InvalidState(task.status));
        }

        let upload_url = self
            .storage
            .presign_upload(&task.raw_location, CSV_CONTENT_TYPE, self.policy.upload_url_ttl)
            .await?;

        tracing::info!(task_id = %id, "Renewed upload URL");
        Ok(UploadSlot { task, upload_url })
    }

    /// `AwaitingUpload -> AwaitingProcessing`. A no-op in any later state.
    pub async fn mark_uploaded(&self, owner: &str, id: Uuid) -> Result<Task, TaskError> {
        let outcome = self
            .store
            .transition(
                owner,
                id,
                &[TaskStatus::AwaitingUpload],
                TaskUpdate::to(TaskStatus::AwaitingProcessing),
            )
            .await?;

        match outcome {
            Transition::Applied(task) => {
                tracing::info!(task_id = %id, "Upload marked complete");
                Ok(task)
            }
            Transition::Rejected(task) => {
                tracing::debug!(task_id = %id, status = %task.status, "Upload already marked complete");
                Ok(task)
            }
            Transition::Missing => Err(TaskError::NotFound),
        }
    }

    fn admissible(&self) -> &'static [TaskStatus] {
        if self.policy.allow_retry_failed {
            &[TaskStatus::AwaitingProcessing, TaskStatus::Failed]
        } else {
            &[TaskStatus::AwaitingProcessing]
        }
    }

    /// Move the task into `Processing` under a fresh run token. This is the only
    /// way a run can be created; only the run holding the current token may start
    /// or settle.
    pub async fn admit(&self, owner: &str, id: Uuid) -> Result<Task, TaskError> {
        let outcome = self
            .store
            .transition(owner, id, self.admissible(), TaskUpdate::admitted(Uuid::new_v4()))
            .await?;

        match outcome {
            Transition::Applied(task) => Ok(task),
            Transition::Rejected(task) if task.status == TaskStatus::Processing => {
                Err(TaskError::AlreadyInProgress)
            }
            Transition::Rejected(task) => Err(TaskError::InvalidState(task.status)),
            Transition::Missing => Err(TaskError::NotFound),
        }
    }

    /// Admit and run the pipeline on its own tokio task, waiting for the outcome.
    ///
    /// The run keeps going if the caller is dropped.
    pub async fn process(&self, owner: &str, id: Uuid) -> Result<Task, TaskError> {
        let task = self.admit(owner, id).await?;
        let attempt = run_token(&task)?;
        tracing::info!(task_id = %id, %attempt, "Processing admitted");

        let manager = self.clone();
        let owner = owner.to_string();
        tokio::spawn(async move { manager.resume(&owner, id, attempt).await })
            .await
            .map_err(|e| TaskError::Internal(format!("processing run aborted: {e}")))??
            .ok_or_else(|| TaskError::Internal("processing run was superseded before it started".to_string()))
    }

    /// Admit and hand the run to the worker through `queue`.
    pub async fn process_deferred(
        &self,
        owner: &str,
        id: Uuid,
        queue: &JobQueue,
    ) -> Result<Task, TaskError> {
        let task = self.admit(owner, id).await?;
        let attempt = run_token(&task)?;

        let run = QueuedRun {
            task_id: id,
            owner: owner.to_string(),
            attempt,
        };
        if let Err(e) = queue.enqueue(&run).await {
            tracing::error!(task_id = %id, error = %e, "Failed to enqueue processing run");
            self.store
                .settle_run(
                    owner,
                    id,
                    attempt,
                    TaskUpdate::failed(TaskStatus::Failed, format!("failed to enqueue: {e}")),
                )
                .await?;
            return Err(e.into());
        }

        tracing::info!(task_id = %id, %attempt, "Processing run queued");
        Ok(task)
    }

    /// Execute admitted run `attempt`.
    ///
    /// Returns `None` without doing anything if that run is no longer current or
    /// has already been started: the task was deleted, reaped, re-admitted, or the
    /// same run was delivered twice.
    pub async fn resume(
        &self,
        owner: &str,
        id: Uuid,
        attempt: Uuid,
    ) -> Result<Option<Task>, TaskError> {
        match self.store.start_run(owner, id, attempt).await? {
            Transition::Applied(task) => self.run_admitted(task, attempt).await.map(Some),
            Transition::Rejected(task) => {
                tracing::warn!(task_id = %id, %attempt, status = %task.status, "Skipping run that is not current");
                Ok(None)
            }
            Transition::Missing => {
                tracing::warn!(task_id = %id, %attempt, "Skipping run for deleted task");
                Ok(None)
            }
        }
    }

    /// Run the pipeline for a started run and record the outcome.
    async fn run_admitted(&self, task: Task, attempt: Uuid) -> Result<Task, TaskError> {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(
            self.policy.processing_timeout,
            pipeline::run(self.storage.as_ref(), self.predictor.as_ref(), &task, attempt),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(RunFailure {
                status: TaskStatus::Failed,
                error: TaskError::Internal(TIMEOUT_ERROR.to_string()),
            }),
        };

        metrics::histogram!("air_quality_processing_seconds").record(start.elapsed().as_secs_f64());

        match outcome {
            Ok(key) => self.finish(&task, attempt, key).await,
            Err(failure) => {
                tracing::warn!(
                    task_id = %task.id,
                    status = %failure.status,
                    error = %failure.error,
                    "Processing failed"
                );
                metrics::counter!("air_quality_tasks_failed_total", "status" => failure.status.to_string())
                    .increment(1);

                let update = TaskUpdate::failed(failure.status, failure.error.to_string());
                if let Transition::Rejected(current) = self
                    .store
                    .settle_run(&task.owner, task.id, attempt, update)
                    .await?
                {
                    tracing::warn!(task_id = %task.id, status = %current.status, "Run was superseded before failure was recorded");
                }
                Err(failure.error)
            }
        }
    }

    async fn finish(&self, task: &Task, attempt: Uuid, key: String) -> Result<Task, TaskError> {
        let outcome = self
            .store
            .settle_run(&task.owner, task.id, attempt, TaskUpdate::succeeded(key.clone()))
            .await?;

        match outcome {
            Transition::Applied(done) => {
                metrics::counter!("air_quality_tasks_succeeded_total").increment(1);
                tracing::info!(task_id = %task.id, result = %key, "Processing succeeded");
                Ok(done)
            }
            other => {
                // Only this run's own object is removed; the current run writes elsewhere.
                tracing::warn!(task_id = %task.id, %attempt, "Discarding result of superseded run");
                if let Err(e) = self.storage.delete(&key).await {
                    tracing::error!(task_id = %task.id, error = %e, "Failed to discard result");
                }
                match other {
                    Transition::Rejected(current) => Err(TaskError::InvalidState(current.status)),
                    _ => Err(TaskError::NotFound),
                }
            }
        }
    }

    pub async fn get_status(&self, owner: &str, id: Uuid) -> Result<Task, TaskError> {
        self.store
            .get(owner, id)
            .await?
            .ok_or(TaskError::NotFound)
    }

    pub async fn list(&self, owner: &str) -> Result<Vec<Task>, TaskError> {
        Ok(self.store.list(owner).await?)
    }

    /// Processed CSV bytes. `NotFound` until the task has succeeded.
    pub async fn download(&self, owner: &str, id: Uuid) -> Result<Vec<u8>, TaskError> {
        let task = self.get_status(owner, id).await?;
        let key = task.result_location.ok_or(TaskError::NotFound)?;

        match self.storage.download(&key).await {
            Ok(bytes) => Ok(bytes),
            Err(StorageError::NotFound(_)) => Err(TaskError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the record, then its stored objects. Objects already gone are fine.
    ///
    /// The record is removed only if the task is not `Processing` at that moment,
    /// so a run admitted concurrently keeps its record and upload.
    pub async fn delete(&self, owner: &str, id: Uuid) -> Result<(), TaskError> {
        let task = match self.store.delete(owner, id, DELETABLE).await? {
            Transition::Applied(task) => task,
            Transition::Rejected(_) => return Err(TaskError::AlreadyInProgress),
            Transition::Missing => return Err(TaskError::NotFound),
        };

        let keys = std::iter::once(&task.raw_location).chain(task.result_location.as_ref());
        for key in keys {
            match self.storage.delete(key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(task_id = %id, key = %key, error = %e, "Failed to delete object of removed task");
                }
            }
        }

        tracing::info!(task_id = %id, "Deleted task");
        Ok(())
    }

    /// Fail runs that have executed longer than the processing timeout, and
    /// runs that have waited unstarted longer than the queue timeout.
    pub async fn reap_stale(&self) -> Result<Vec<Task>, TaskError> {
        let now = Utc::now();
        let started_before = now - to_chrono(self.policy.processing_timeout)?;
        let queued_before = now - to_chrono(self.policy.queue_timeout)?;
        let reaped = self
            .store
            .fail_stale(started_before, queued_before, TIMEOUT_ERROR)
            .await?;

        for task in &reaped {
            metrics::counter!("air_quality_tasks_failed_total", "status" => "timed_out").increment(1);
            tracing::warn!(task_id = %task.id, started = task.started_at.is_some(), "Failed stale processing run");
        }
        Ok(reaped)
    }
}

/// Every status a task can be deleted from.
const DELETABLE: &[TaskStatus] = &[
    TaskStatus::AwaitingUpload,
    TaskStatus::AwaitingProcessing,
    TaskStatus::Succeeded,
    TaskStatus::Failed,
    TaskStatus::Corrupted,
];

fn run_token(task: &Task) -> Result<Uuid, TaskError> {
    task.attempt
        .ok_or_else(|| TaskError::Internal("admitted task has no run token".to_string()))
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration, TaskError> {
    chrono::Duration::from_std(duration).map_err(|e| TaskError::Internal(e.to_string()))
}
