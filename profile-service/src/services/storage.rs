//! Blob storage behind the document registry.
//!
//! [`BucketStorage`] wraps any `object_store` backend (in-memory, local
//! filesystem, S3/MinIO) and adds bounded retries, per-call timeouts and
//! time-limited download URLs.

use crate::config::{StorageBackend, StorageConfig};
use crate::services::clock::Clock;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use secrecy::{ExposeSecret, Secret};
use service_core::utils::signature::{generate_url_signature, verify_url_signature};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_PROBE_KEY: &str = "_health/probe";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;
    /// Fails with [`StorageError::NotFound`] when nothing is stored under `key`.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Mint a URL that allows reading `key` until `ttl` elapses.
    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Signs `/files/{key}` links for backends that cannot presign on their own.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: Secret<String>,
}

impl UrlSigner {
    pub fn new(base_url: impl Into<String>, secret: Secret<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
        }
    }

    pub fn sign(&self, key: &str, expires: i64) -> Result<String, StorageError> {
        let signature =
            generate_url_signature(self.secret.expose_secret(), "GET", key, expires)
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(format!(
            "{}/files/{}?expires={}&signature={}",
            self.base_url, key, expires, signature
        ))
    }

    /// True when the signature matches and `now` (unix seconds) is before `expires`.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now >= expires {
            return false;
        }
        verify_url_signature(self.secret.expose_secret(), "GET", key, expires, signature)
            .unwrap_or(false)
    }
}

enum Presigner {
    S3(Arc<AmazonS3>),
    Signed(UrlSigner),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_elapsed: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
            max_attempts: config.retry_max_attempts.max(1),
        }
    }
}

pub struct BucketStorage {
    inner: Arc<dyn ObjectStore>,
    presigner: Presigner,
    retry: RetryPolicy,
    supports_attributes: bool,
    clock: Arc<dyn Clock>,
}

impl BucketStorage {
    pub fn from_config(
        config: &StorageConfig,
        signer: UrlSigner,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let retry = RetryPolicy::from_config(config);

        match config.backend {
            StorageBackend::Memory => Ok(Self::in_memory(signer, retry, clock)),
            StorageBackend::Local => {
                std::fs::create_dir_all(&config.local_path).map_err(|e| {
                    StorageError::Unavailable(format!(
                        "cannot create {}: {}",
                        config.local_path, e
                    ))
                })?;
                let store = LocalFileSystem::new_with_prefix(&config.local_path)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                tracing::info!(path = %config.local_path, "Using local filesystem storage");
                Ok(Self {
                    inner: Arc::new(store),
                    presigner: Presigner::Signed(signer),
                    retry,
                    supports_attributes: false,
                    clock,
                })
            }
            StorageBackend::S3 => {
                let s3 = config.s3.as_ref().ok_or_else(|| {
                    StorageError::Unavailable("S3 backend selected without S3 settings".into())
                })?;

                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&s3.bucket)
                    .with_region(&s3.region);
                if let Some(endpoint) = &s3.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let Some(access_key) = &s3.access_key {
                    builder = builder.with_access_key_id(access_key);
                }
                if let Some(secret_key) = &s3.secret_key {
                    builder = builder.with_secret_access_key(secret_key.expose_secret());
                }

                let store = Arc::new(
                    builder
                        .build()
                        .map_err(|e| StorageError::Unavailable(e.to_string()))?,
                );
                tracing::info!(bucket = %s3.bucket, region = %s3.region, "Using S3 storage");
                Ok(Self {
                    inner: store.clone(),
                    presigner: Presigner::S3(store),
                    retry,
                    supports_attributes: true,
                    clock,
                })
            }
        }
    }

    pub fn in_memory(signer: UrlSigner, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            presigner: Presigner::Signed(signer),
            retry,
            supports_attributes: true,
            clock,
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, object_store::Error>>,
    {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let max_attempts = self.retry.max_attempts;
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_elapsed_time: Some(self.retry.max_elapsed),
            ..Default::default()
        };

        let f = &f;
        let attempts_ref = &attempts;
        let result = retry(policy, move || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            match tokio::time::timeout(CALL_TIMEOUT, f()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(object_store::Error::NotFound { path, .. })) => {
                    Err(backoff::Error::permanent(StorageError::NotFound(path)))
                }
                Ok(Err(e)) => {
                    let err = StorageError::Unavailable(e.to_string());
                    if attempt >= max_attempts {
                        Err(backoff::Error::permanent(err))
                    } else {
                        tracing::warn!(op, key, attempt, error = %err, "Storage call failed, retrying");
                        Err(backoff::Error::transient(err))
                    }
                }
                Err(_) => {
                    let err = StorageError::Unavailable(format!("{} timed out", op));
                    if attempt >= max_attempts {
                        Err(backoff::Error::permanent(err))
                    } else {
                        Err(backoff::Error::transient(err))
                    }
                }
            }
        })
        .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(StorageError::NotFound(_)) => "not_found",
            Err(StorageError::Unavailable(_)) => "error",
        };
        metrics::counter!("storage_operations_total", "op" => op, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("storage_operation_duration_seconds", "op" => op)
            .record(started.elapsed().as_secs_f64());

        result
    }
}

#[async_trait]
impl Storage for BucketStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        let path = Path::from(key);
        let mut attributes = Attributes::new();
        if self.supports_attributes {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }

        self.with_retry("put", key, || {
            let opts = PutOptions {
                attributes: attributes.clone(),
                ..Default::default()
            };
            self.inner
                .put_opts(&path, PutPayload::from(data.clone()), opts)
        })
        .await?;

        tracing::debug!(key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(key);
        self.with_retry("get", key, || async {
            self.inner.get(&path).await?.bytes().await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = Path::from(key);
        // Most backends treat deleting a missing key as success.
        self.with_retry("head", key, || self.inner.head(&path)).await?;
        self.with_retry("delete", key, || self.inner.delete(&path)).await?;
        tracing::debug!(key, "Deleted object");
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let path = Path::from(key);
        self.with_retry("head", key, || self.inner.head(&path)).await?;

        match &self.presigner {
            Presigner::S3(s3) => {
                let url = s3
                    .signed_url(http::Method::GET, &path, ttl)
                    .await
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                Ok(url.to_string())
            }
            Presigner::Signed(signer) => {
                let expires = self.clock.now().timestamp() + ttl.as_secs() as i64;
                signer.sign(key, expires)
            }
        }
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let path = Path::from(HEALTH_PROBE_KEY);
        match tokio::time::timeout(CALL_TIMEOUT, self.inner.head(&path)).await {
            Ok(Ok(_)) | Ok(Err(object_store::Error::NotFound { .. })) => Ok(()),
            Ok(Err(e)) => Err(StorageError::Unavailable(e.to_string())),
            Err(_) => Err(StorageError::Unavailable("health probe timed out".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;

    fn signer() -> UrlSigner {
        UrlSigner::new("http://localhost:8080/", Secret::new("test-secret".to_string()))
    }

    fn storage() -> BucketStorage {
        BucketStorage::in_memory(
            signer(),
            RetryPolicy {
                max_elapsed: Duration::from_millis(200),
                max_attempts: 2,
            },
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test]
    async fn put_get_delete() {
        let storage = storage();
        storage
            .put("usr_1/photo/1-abc", Bytes::from_static(b"img"), "image/png")
            .await
            .unwrap();
        assert_eq!(storage.get("usr_1/photo/1-abc").await.unwrap(), Bytes::from_static(b"img"));

        storage.delete("usr_1/photo/1-abc").await.unwrap();
        assert!(matches!(
            storage.get("usr_1/photo/1-abc").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_missing_key_is_not_found() {
        assert!(matches!(
            storage().delete("usr_1/cv/none").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn presigning_missing_key_is_not_found() {
        assert!(matches!(
            storage()
                .presign("usr_x/cv/never-written", Duration::from_secs(60))
                .await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn presigned_url_carries_key_and_verifies() {
        let storage = storage();
        storage
            .put("usr_1/cv/1-abc", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();
        let url = storage
            .presign("usr_1/cv/1-abc", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:8080/files/usr_1/cv/1-abc?expires="));

        let query = url.split('?').nth(1).unwrap();
        let mut expires = 0;
        let mut signature = "";
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v,
                _ => {}
            }
        }

        let signer = signer();
        assert!(signer.verify("usr_1/cv/1-abc", expires, signature, expires - 10));
        assert!(!signer.verify("usr_1/cv/1-abc", expires, signature, expires));
        assert!(!signer.verify("usr_2/cv/1-abc", expires, signature, expires - 10));
    }

    #[tokio::test]
    async fn health_check_tolerates_missing_probe() {
        assert!(storage().health_check().await.is_ok());
    }
}
