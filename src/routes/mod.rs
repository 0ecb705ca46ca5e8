use axum::routing::{delete, get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod health;
pub mod metrics;
pub mod tasks;

/// Prefix all task endpoints are mounted under.
pub const API_PREFIX: &str = "/api/v1/air-quality";

/// Task endpoints plus the health check, bound to `state`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/new-task", post(tasks::new_task))
        .route("/renew-upload-url/{task_id}", post(tasks::renew_upload_url))
        .route("/mark-upload-complete/{task_id}", post(tasks::mark_upload_complete))
        .route("/process-file", post(tasks::process_file))
        .route("/file-status/{task_id}", get(tasks::file_status))
        .route("/user-files", get(tasks::user_files))
        .route(
            "/download-processed-file/{task_id}",
            get(tasks::download_processed_file),
        )
        .route("/delete-file/{task_id}", delete(tasks::delete_file));

    Router::new()
        .route("/health", get(health::health_check))
        .nest(API_PREFIX, api)
        .with_state(state)
}
