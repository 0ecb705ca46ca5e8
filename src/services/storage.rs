use async_trait::async_trait;
// rust-s3 signs with the http 0.2 types, not the ones axum re-exports.
use http::{header, HeaderMap, HeaderValue};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// Longest expiry S3 accepts for a presigned URL (seven days).
pub const MAX_PRESIGN_SECS: u32 = 604_800;

/// Object storage operations the task lifecycle depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Presigned PUT URL for `key`, restricted to `content_type`.
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Delete `key`. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Client for S3-compatible object storage.
pub struct S3Storage {
    bucket: Box<Bucket>,
}

impl S3Storage {
    pub fn new(
        bucket_name: &str,
        region: &str,
        endpoint: Option<&str>,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(e.to_string()))?,
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

/// Map a non-2xx response code to an error.
fn check_status(key: &str, code: u16) -> Result<(), StorageError> {
    match code {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(key.to_string())),
        other => Err(StorageError::Status(other)),
    }
}

fn map_s3(key: &str, err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::S3(other),
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type).map_err(|e| StorageError::Config(e.to_string()))?,
        );
        let expiry = u32::try_from(ttl.as_secs())
            .unwrap_or(MAX_PRESIGN_SECS)
            .min(MAX_PRESIGN_SECS);

        self.bucket
            .presign_put(key, expiry, Some(headers), None)
            .await
            .map_err(StorageError::S3)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(|e| map_s3(key, e))?;
        check_status(key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(|e| map_s3(key, e))?;
        check_status(key, response.status_code())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = match self.bucket.delete_object(key).await {
            Ok(response) => response,
            Err(S3Error::HttpFailWithBody(404, _)) => return Ok(()),
            Err(e) => return Err(StorageError::S3(e)),
        };
        match check_status(key, response.status_code()) {
            Err(StorageError::NotFound(_)) => Ok(()),
            other => other,
        }
    }
}

/// In-process object store for tests and local runs.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, as a client upload would.
    pub fn insert(&self, key: &str, data: &[u8]) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(key.to_string(), data.to_vec());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{key}?content-type={content_type}&expires={}",
            ttl.as_secs()
        ))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key).ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn upload(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), StorageError> {
        self.insert(key, data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if let Ok(mut objects) = self.objects.write() {
            objects.remove(key);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage returned HTTP {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
