use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::task::{Task, TaskStatus};

/// Body of `POST /process-file`.
#[derive(Debug, Deserialize)]
pub struct ProcessFileRequest {
    pub task_id: Uuid,

    /// Hand the run to the worker instead of processing inline.
    #[serde(default)]
    pub defer: bool,
}

/// Response carrying a task and a fresh upload URL.
#[derive(Debug, Serialize)]
pub struct UploadSlotResponse {
    pub message: String,
    pub upload_url: String,
    pub data: Task,
}

/// Generic single-task response.
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub message: String,
    pub data: Task,
}

/// Response of `GET /file-status/{task_id}`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: TaskStatus,
    pub data: Task,
}

#[derive(Debug, Serialize)]
pub struct ProcessLocations {
    pub raw_location: String,
    pub result_location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub message: String,
    pub status: TaskStatus,
    pub data: ProcessLocations,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub count: usize,
    pub data: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// JSON error envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error: String,
    pub retriable: bool,
}
