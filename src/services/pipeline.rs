use crate::error::TaskError;
use crate::models::task::{result_key, Task, TaskStatus};
use crate::services::impute::impute;
use crate::services::model::Predictor;
use crate::services::normalize::{normalize, parse_csv};
use crate::services::storage::ObjectStore;
use uuid::Uuid;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Why a run stopped, and which terminal status the task should take.
#[derive(Debug)]
pub struct RunFailure {
    pub status: TaskStatus,
    pub error: TaskError,
}

impl RunFailure {
    fn failed(error: TaskError) -> Self {
        Self {
            status: TaskStatus::Failed,
            error,
        }
    }

    fn corrupted(error: TaskError) -> Self {
        Self {
            status: TaskStatus::Corrupted,
            error,
        }
    }
}

/// Fetch, normalize, impute and store one task's data.
///
/// The output goes to the result key of run `attempt`, which is returned. Content that cannot be decoded
/// as CSV at all is reported as `Corrupted`; everything else as `Failed`.
pub async fn run(
    storage: &dyn ObjectStore,
    predictor: &dyn Predictor,
    task: &Task,
    attempt: Uuid,
) -> Result<String, RunFailure> {
    tracing::debug!(task_id = %task.id, key = %task.raw_location, "Downloading raw upload");
    let bytes = storage
        .download(&task.raw_location)
        .await
        .map_err(|e| RunFailure::failed(e.into()))?;

    let table = tokio::task::spawn_blocking(move || {
        let raw = parse_csv(&bytes)
            .map_err(|e| RunFailure::corrupted(TaskError::MalformedInput(e.to_string())))?;
        normalize(&raw).map_err(|e| RunFailure::failed(TaskError::MalformedInput(e.to_string())))
    })
    .await
    .map_err(|e| RunFailure::failed(TaskError::Internal(format!("normalization aborted: {e}"))))??;

    tracing::debug!(task_id = %task.id, rows = table.len(), "Normalized readings");

    let table = impute(table, predictor)
        .await
        .map_err(|e| RunFailure::failed(e.into()))?;

    let output = table
        .to_csv()
        .map_err(|e| RunFailure::failed(TaskError::Internal(format!("CSV encoding failed: {e}"))))?;

    let key = result_key(task.id, attempt);
    storage
        .upload(&key, &output, CSV_CONTENT_TYPE)
        .await
        .map_err(|e| RunFailure::failed(e.into()))?;

    Ok(key)
}
