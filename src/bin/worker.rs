use air_quality_hw::{
    config::AppConfig,
    db::{self, queries::PgTaskStore},
    services::{
        model,
        queue::JobQueue,
        storage::S3Storage,
        tasks::TaskManager,
    },
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000;
const REAP_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting air-quality processing worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = S3Storage::new(
        &config.s3_bucket,
        &config.s3_region,
        config.s3_endpoint.as_deref(),
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize S3 client");

    let predictor = model::load_predictor(
        &config.model_path,
        config.model_endpoint.as_deref(),
        config.model_api_token.as_deref(),
    )
    .expect("Failed to load imputation model");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let tasks = TaskManager::new(
        Arc::new(PgTaskStore::new(db_pool)),
        Arc::new(storage),
        predictor,
        config.task_policy(),
    );

    match queue.recover_in_flight().await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(runs = n, "Re-queued runs left by a previous worker"),
        Err(e) => tracing::error!(error = %e, "Failed to recover in-flight runs"),
    }

    tracing::info!("Worker ready, starting run loop");

    let mut last_reap = Instant::now();
    loop {
        if last_reap.elapsed() >= Duration::from_secs(REAP_INTERVAL_SECS) {
            reap(&tasks, &queue).await;
            last_reap = Instant::now();
        }

        match process_next_run(&tasks, &queue).await {
            Ok(true) => {
                tracing::debug!("Run finished, checking for next run");
            }
            Ok(false) => {
                tracing::trace!("No runs queued, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error fetching run, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Fail stuck runs and publish the queue depth.
async fn reap(tasks: &TaskManager, queue: &JobQueue) {
    if let Err(e) = tasks.reap_stale().await {
        tracing::error!(error = %e, "Failed to reap stale runs");
    }
    match queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("air_quality_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
    }
}

/// Execute the next queued run.
/// Returns Ok(true) if a run was taken, Ok(false) if the queue was empty.
async fn process_next_run(
    tasks: &TaskManager,
    queue: &JobQueue,
) -> Result<bool, Box<dyn std::error::Error>> {
    let run = match queue.dequeue().await? {
        Some(r) => r,
        None => return Ok(false),
    };

    tracing::info!(task_id = %run.task_id, "Executing queued processing run");

    // Failures are already recorded on the task; the run is done either way.
    match tasks.resume(&run.owner, run.task_id, run.attempt).await {
        Ok(Some(task)) => {
            tracing::info!(task_id = %task.id, status = %task.status, "Queued run completed");
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(task_id = %run.task_id, error = %e, retriable = e.is_retriable(), "Queued run failed");
        }
    }

    queue.complete(&run).await?;
    Ok(true)
}
