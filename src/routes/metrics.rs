use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the Prometheus recorder and register metric descriptions.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "air_quality_tasks_issued_total",
        "Upload slots issued"
    );
    metrics::describe_counter!(
        "air_quality_tasks_succeeded_total",
        "Processing runs that produced a result"
    );
    metrics::describe_counter!(
        "air_quality_tasks_failed_total",
        "Processing runs that ended failed, corrupted or timed out"
    );
    metrics::describe_histogram!(
        "air_quality_processing_seconds",
        "Wall time of a processing run"
    );
    metrics::describe_gauge!(
        "air_quality_queue_depth",
        "Deferred runs waiting for a worker"
    );

    Ok(Arc::new(handle))
}

/// Prometheus scrape endpoint, text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
