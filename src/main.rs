use air_quality_hw::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries::PgTaskStore},
    middleware::auth::TokenVerifier,
    routes,
    services::{model, queue::JobQueue, storage::S3Storage, tasks::TaskManager},
};
use axum::routing::get;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing air-quality processing server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing S3 storage client");
    let storage = S3Storage::new(
        &config.s3_bucket,
        &config.s3_region,
        config.s3_endpoint.as_deref(),
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize S3 client");

    // Loaded once; shared read-only by every processing run.
    tracing::info!("Loading imputation model");
    let predictor = model::load_predictor(
        &config.model_path,
        config.model_endpoint.as_deref(),
        config.model_api_token.as_deref(),
    )
    .expect("Failed to load imputation model");

    tracing::info!("Connecting to Redis run queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let tasks = TaskManager::new(
        Arc::new(PgTaskStore::new(db_pool)),
        Arc::new(storage),
        predictor,
        config.task_policy(),
    );
    let state = AppState::new(tasks, queue, TokenVerifier::new(&config.jwt_secret));

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_request_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
