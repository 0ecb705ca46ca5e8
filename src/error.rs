use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::db::StoreError;
use crate::models::api::ErrorResponse;
use crate::models::task::TaskStatus;
use crate::services::model::InferenceError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

/// Errors surfaced by task operations and mapped onto HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("File not found")]
    NotFound,

    #[error("Operation not allowed while task is {0}")]
    InvalidState(TaskStatus),

    #[error("Task is already being processed")]
    AlreadyInProgress,

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Infrastructure errors that may succeed when repeated unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TaskError::InferenceFailure(_) | TaskError::StorageFailure(_) | TaskError::Internal(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            TaskError::NotFound => StatusCode::NOT_FOUND,
            TaskError::InvalidState(_) | TaskError::AlreadyInProgress => StatusCode::CONFLICT,
            TaskError::MalformedInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TaskError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            TaskError::InferenceFailure(_)
            | TaskError::StorageFailure(_)
            | TaskError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            TaskError::NotFound => "File not found",
            TaskError::InvalidState(_) => "Operation not allowed in current state",
            TaskError::AlreadyInProgress => "File is already being processed",
            TaskError::MalformedInput(_) => "Failed to process file",
            TaskError::InferenceFailure(_) => "Failed to process file",
            TaskError::StorageFailure(_) => "Storage operation failed",
            TaskError::Unauthorized(_) => "Authentication required",
            TaskError::Internal(_) => "Internal server error",
        }
    }
}

impl From<StoreError> for TaskError {
    fn from(e: StoreError) -> Self {
        TaskError::Internal(e.to_string())
    }
}

impl From<StorageError> for TaskError {
    fn from(e: StorageError) -> Self {
        TaskError::StorageFailure(e.to_string())
    }
}

impl From<InferenceError> for TaskError {
    fn from(e: InferenceError) -> Self {
        TaskError::InferenceFailure(e.to_string())
    }
}

impl From<QueueError> for TaskError {
    fn from(e: QueueError) -> Self {
        TaskError::Internal(e.to_string())
    }
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the logs.
        let error = match &self {
            TaskError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            message: self.message().to_string(),
            error,
            retriable: self.is_retriable(),
        };
        (status, Json(body)).into_response()
    }
}
