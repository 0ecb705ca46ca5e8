//! Test helper utilities for E2E testing

use air_quality_hw::middleware::auth::Claims;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

pub const API_PREFIX: &str = "/api/v1/air-quality";

/// Task record as serialized by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    pub id: Uuid,
    pub status: String,
    pub raw_location: String,
    pub result_location: Option<String>,
    pub error: Option<String>,
}

/// Response from POST /new-task
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadSlotResponse {
    pub message: String,
    pub upload_url: String,
    pub data: TaskView,
}

/// Response from POST /process-file
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub message: String,
    pub status: String,
}

/// Response from GET /file-status/{task_id}
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub data: TaskView,
}

/// Mint a bearer token the server accepts.
///
/// Uses JWT_SECRET from the environment, the same variable the server reads.
pub fn bearer_token(owner: &str) -> String {
    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_string());
    let claims = Claims {
        sub: owner.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        username: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign test token")
}

/// Create a task and PUT `csv` to its presigned URL.
pub async fn upload_csv(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    csv: &str,
) -> Result<UploadSlotResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}{}/new-task", base_url, API_PREFIX))
        .bearer_auth(token)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Task creation failed with status {}: {}", status, error_text).into());
    }

    let slot = response.json::<UploadSlotResponse>().await?;

    let put = client
        .put(&slot.upload_url)
        .header(reqwest::header::CONTENT_TYPE, "text/csv")
        .body(csv.to_string())
        .send()
        .await?;

    if !put.status().is_success() {
        return Err(format!("Presigned upload failed with status {}", put.status()).into());
    }

    let marked = client
        .post(format!(
            "{}{}/mark-upload-complete/{}",
            base_url, API_PREFIX, slot.data.id
        ))
        .bearer_auth(token)
        .send()
        .await?;

    if !marked.status().is_success() {
        let error_text = marked.text().await?;
        return Err(format!("Marking upload failed: {}", error_text).into());
    }

    Ok(slot)
}

/// Poll task status until it leaves `processing` (with timeout)
pub async fn poll_task_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    task_id: Uuid,
    timeout_secs: u64,
) -> Result<StatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}{}/file-status/{}", base_url, API_PREFIX, task_id))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<StatusResponse>().await?;

        match status_response.status.as_str() {
            "succeeded" | "failed" | "corrupted" => return Ok(status_response),
            "processing" | "awaiting_processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => {
                return Err(format!("Unexpected task status: {}", other).into());
            }
        }
    }

    Err(format!("Task did not finish within {} seconds", timeout_secs).into())
}
