use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::TaskError;
use crate::middleware::auth::AuthUser;
use crate::models::api::{
    MessageResponse, ProcessFileRequest, ProcessLocations, ProcessResponse, StatusResponse,
    TaskListResponse, TaskResponse, UploadSlotResponse,
};
use crate::services::pipeline::CSV_CONTENT_TYPE;

/// POST /new-task: create a task and return a presigned upload URL.
pub async fn new_task(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
) -> Result<(StatusCode, Json<UploadSlotResponse>), TaskError> {
    let slot = state.tasks.issue(&owner).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadSlotResponse {
            message: "Presigned URL generated successfully".to_string(),
            upload_url: slot.upload_url,
            data: slot.task,
        }),
    ))
}

/// POST /renew-upload-url/{task_id}: replace an expired upload URL.
pub async fn renew_upload_url(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<UploadSlotResponse>, TaskError> {
    let slot = state.tasks.renew_upload(&owner, task_id).await?;

    Ok(Json(UploadSlotResponse {
        message: "Presigned URL renewed".to_string(),
        upload_url: slot.upload_url,
        data: slot.task,
    }))
}

/// POST /mark-upload-complete/{task_id}
pub async fn mark_upload_complete(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskResponse>, TaskError> {
    let task = state.tasks.mark_uploaded(&owner, task_id).await?;

    Ok(Json(TaskResponse {
        message: "File marked as ready to process".to_string(),
        data: task,
    }))
}

/// POST /process-file: run processing inline, or queue it when `defer` is set.
pub async fn process_file(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Json(request): Json<ProcessFileRequest>,
) -> Result<(StatusCode, Json<ProcessResponse>), TaskError> {
    let (code, message, task) = if request.defer {
        let task = state
            .tasks
            .process_deferred(&owner, request.task_id, &state.queue)
            .await?;
        (StatusCode::ACCEPTED, "File queued for processing", task)
    } else {
        let task = state.tasks.process(&owner, request.task_id).await?;
        (StatusCode::OK, "File processed successfully", task)
    };

    Ok((
        code,
        Json(ProcessResponse {
            message: message.to_string(),
            status: task.status,
            data: ProcessLocations {
                raw_location: task.raw_location,
                result_location: task.result_location,
            },
        }),
    ))
}

/// GET /file-status/{task_id}
pub async fn file_status(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, TaskError> {
    let task = state.tasks.get_status(&owner, task_id).await?;

    Ok(Json(StatusResponse {
        status: task.status,
        data: task,
    }))
}

/// GET /user-files
pub async fn user_files(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
) -> Result<Json<TaskListResponse>, TaskError> {
    let tasks = state.tasks.list(&owner).await?;

    Ok(Json(TaskListResponse {
        count: tasks.len(),
        data: tasks,
    }))
}

/// GET /download-processed-file/{task_id}: processed CSV as an attachment.
pub async fn download_processed_file(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Response, TaskError> {
    let bytes = state.tasks.download(&owner, task_id).await?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{task_id}_processed.csv\""
    ))
    .map_err(|e| TaskError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(CSV_CONTENT_TYPE)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// DELETE /delete-file/{task_id}
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, TaskError> {
    state.tasks.delete(&owner, task_id).await?;

    Ok(Json(MessageResponse {
        message: "File deleted successfully".to_string(),
    }))
}
