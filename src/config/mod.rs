use serde::Deserialize;
use std::time::Duration;

use crate::services::tasks::TaskPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for deferred processing runs
    pub redis_url: String,

    /// S3 bucket holding raw uploads and processed results
    pub s3_bucket: String,

    /// S3 region name (e.g., "eu-west-1", or "auto" for custom endpoints)
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Custom S3-compatible endpoint URL
    pub s3_endpoint: Option<String>,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,

    /// Path of the regression-forest artifact, loaded once at startup
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Remote inference endpoint; takes precedence over `model_path` when set
    pub model_endpoint: Option<String>,

    pub model_api_token: Option<String>,

    #[serde(default = "default_upload_url_ttl_secs")]
    pub upload_url_ttl_secs: u64,

    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// How long an admitted run may wait for a worker
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,

    /// Allow `Failed` tasks to be processed again
    #[serde(default = "default_allow_retry_failed")]
    pub allow_retry_failed: bool,

    /// Request body limit in bytes
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_model_path() -> String {
    "air_quality_rf_model.json".to_string()
}

fn default_upload_url_ttl_secs() -> u64 {
    8 * 60 * 60
}

fn default_processing_timeout_secs() -> u64 {
    600
}

fn default_queue_timeout_secs() -> u64 {
    60 * 60
}

fn default_allow_retry_failed() -> bool {
    true
}

fn default_max_request_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn task_policy(&self) -> TaskPolicy {
        TaskPolicy {
            upload_url_ttl: Duration::from_secs(self.upload_url_ttl_secs),
            processing_timeout: Duration::from_secs(self.processing_timeout_secs),
            queue_timeout: Duration::from_secs(self.queue_timeout_secs),
            allow_retry_failed: self.allow_retry_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/air_quality"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("S3_BUCKET", "air-quality"),
            ("S3_ACCESS_KEY", "key"),
            ("S3_SECRET_KEY", "secret"),
            ("JWT_SECRET", "jwt"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let config: AppConfig = envy::from_iter(required()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.upload_url_ttl_secs, 28_800);
        assert!(config.allow_retry_failed);
        assert!(config.model_endpoint.is_none());

        let policy = config.task_policy();
        assert_eq!(policy.processing_timeout, Duration::from_secs(600));
        assert_eq!(policy.queue_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_overrides_parsed() {
        let mut vars = required();
        vars.push(("ALLOW_RETRY_FAILED".into(), "false".into()));
        vars.push(("PROCESSING_TIMEOUT_SECS".into(), "30".into()));
        vars.push(("QUEUE_TIMEOUT_SECS".into(), "120".into()));
        vars.push(("MODEL_ENDPOINT".into(), "http://model:8080/predict".into()));

        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert!(!config.task_policy().allow_retry_failed);
        assert_eq!(config.processing_timeout_secs, 30);
        assert_eq!(config.task_policy().queue_timeout, Duration::from_secs(120));
        assert_eq!(config.model_endpoint.as_deref(), Some("http://model:8080/predict"));
    }

    #[test]
    fn test_missing_required_fails() {
        let result: Result<AppConfig, _> = envy::from_iter(Vec::<(String, String)>::new());
        assert!(result.is_err());
    }
}
