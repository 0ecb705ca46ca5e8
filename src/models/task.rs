use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a file-processing task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    AwaitingUpload,
    AwaitingProcessing,
    Processing,
    Succeeded,
    Failed,
    Corrupted,
}

/// A file-processing task owned by a single identity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub owner: String,
    pub status: TaskStatus,
    pub raw_location: String,
    pub result_location: Option<String>,
    pub error: Option<String>,
    /// Token of the most recently admitted processing run.
    #[serde(skip_serializing)]
    pub attempt: Option<Uuid>,
    /// When the current run began executing. Unset while it waits in the queue.
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a freshly issued task in `AwaitingUpload`.
    pub fn new(id: Uuid, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner: owner.to_string(),
            status: TaskStatus::AwaitingUpload,
            raw_location: raw_key(id),
            result_location: None,
            error: None,
            attempt: None,
            started_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage key the client uploads the raw CSV to.
pub fn raw_key(id: Uuid) -> String {
    format!("{id}_unprocessed.csv")
}

/// Storage key the processed CSV of run `attempt` is written to.
/// Runs of the same task never share an object.
pub fn result_key(id: Uuid, attempt: Uuid) -> String {
    format!("{id}_processed_{attempt}.csv")
}

/// A complete status transition, written atomically.
///
/// `result_location` is only ever set by [`TaskUpdate::succeeded`], which keeps
/// the result location non-null exactly when the status is `Succeeded`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub result_location: Option<String>,
    pub error: Option<String>,
    /// A new run token. Setting it also clears `started_at`.
    pub attempt: Option<Uuid>,
}

impl TaskUpdate {
    pub fn to(status: TaskStatus) -> Self {
        debug_assert!(status != TaskStatus::Succeeded);
        Self {
            status,
            result_location: None,
            error: None,
            attempt: None,
        }
    }

    /// Admission into `Processing` under a fresh run token.
    pub fn admitted(attempt: Uuid) -> Self {
        Self {
            attempt: Some(attempt),
            ..Self::to(TaskStatus::Processing)
        }
    }

    pub fn succeeded(result_location: String) -> Self {
        Self {
            status: TaskStatus::Succeeded,
            result_location: Some(result_location),
            error: None,
            attempt: None,
        }
    }

    pub fn failed(status: TaskStatus, error: impl Into<String>) -> Self {
        debug_assert!(matches!(status, TaskStatus::Failed | TaskStatus::Corrupted));
        Self {
            status,
            result_location: None,
            error: Some(error.into()),
            attempt: None,
        }
    }

    /// Apply to an in-memory record.
    pub fn apply(&self, task: &mut Task) {
        task.status = self.status;
        task.result_location = self.result_location.clone();
        task.error = self.error.clone();
        if let Some(attempt) = self.attempt {
            task.attempt = Some(attempt);
            task.started_at = None;
        }
        task.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_db_text() {
        assert_eq!(TaskStatus::AwaitingUpload.to_string(), "awaiting_upload");
        assert_eq!(TaskStatus::from_str("awaiting_processing").unwrap(), TaskStatus::AwaitingProcessing);
        assert!(TaskStatus::from_str("Processed").is_err());
    }

    #[test]
    fn test_keys_derive_from_id() {
        let id = Uuid::nil();
        assert_eq!(raw_key(id), "00000000-0000-0000-0000-000000000000_unprocessed.csv");
        assert!(result_key(id, Uuid::new_v4())
            .starts_with("00000000-0000-0000-0000-000000000000_processed_"));
        assert_ne!(result_key(id, Uuid::new_v4()), result_key(id, Uuid::new_v4()));
    }

    #[test]
    fn test_admission_resets_run_start() {
        let mut task = Task::new(Uuid::new_v4(), "alice");
        task.started_at = Some(Utc::now());

        let attempt = Uuid::new_v4();
        TaskUpdate::admitted(attempt).apply(&mut task);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.attempt, Some(attempt));
        assert!(task.started_at.is_none());

        // Later updates keep the token.
        TaskUpdate::failed(TaskStatus::Failed, "boom").apply(&mut task);
        assert_eq!(task.attempt, Some(attempt));
    }

    #[test]
    fn test_failed_update_clears_result_location() {
        let mut task = Task::new(Uuid::new_v4(), "alice");
        TaskUpdate::succeeded(result_key(task.id, Uuid::new_v4())).apply(&mut task);
        assert!(task.result_location.is_some());

        TaskUpdate::failed(TaskStatus::Failed, "boom").apply(&mut task);
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result_location.is_none());
        assert_eq!(task.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_owner_not_serialized() {
        let task = Task::new(Uuid::new_v4(), "alice");
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("owner").is_none());
        assert!(json.get("attempt").is_none());
        assert_eq!(json["status"], "awaiting_upload");
    }
}
