use axum::extract::FromRef;
use std::sync::Arc;

use crate::middleware::auth::TokenVerifier;
use crate::services::{queue::JobQueue, tasks::TaskManager};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskManager,
    pub queue: Arc<JobQueue>,
    pub auth: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(tasks: TaskManager, queue: JobQueue, auth: TokenVerifier) -> Self {
        Self {
            tasks,
            queue: Arc::new(queue),
            auth: Arc::new(auth),
        }
    }
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
