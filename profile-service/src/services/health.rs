use crate::services::storage::Storage;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealth {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Checks object storage reachability without any owner context.
#[derive(Clone)]
pub struct StorageProbe {
    storage: Arc<dyn Storage>,
}

impl StorageProbe {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn check_storage(&self) -> StorageHealth {
        let started = Instant::now();
        let result = tokio::time::timeout(PROBE_TIMEOUT, self.storage.health_check()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("storage_probe_latency_ms").record(latency_ms as f64);

        match result {
            Ok(Ok(())) => StorageHealth {
                ok: true,
                latency_ms,
                detail: None,
            },
            Ok(Err(e)) => {
                // Full error stays in the logs; callers only see a generic detail.
                tracing::error!(error = %e, "Storage health check failed");
                StorageHealth {
                    ok: false,
                    latency_ms,
                    detail: Some("storage unreachable".to_string()),
                }
            }
            Err(_) => {
                tracing::error!(timeout_ms = PROBE_TIMEOUT.as_millis() as u64, "Storage health check timed out");
                StorageHealth {
                    ok: false,
                    latency_ms,
                    detail: Some("storage check timed out".to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::StorageError;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct DownStorage;

    #[async_trait]
    impl Storage for DownStorage {
        async fn put(&self, _: &str, _: Bytes, _: &str) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn get(&self, _: &str) -> Result<Bytes, StorageError> {
            unreachable!()
        }
        async fn delete(&self, _: &str) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn presign(&self, _: &str, _: Duration) -> Result<String, StorageError> {
            unreachable!()
        }
        async fn health_check(&self) -> Result<(), StorageError> {
            Err(StorageError::Unavailable(
                "connect to https://AKIA...@bucket.internal failed".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn failure_detail_is_generic() {
        let health = StorageProbe::new(Arc::new(DownStorage)).check_storage().await;
        assert!(!health.ok);
        let body = serde_json::to_string(&health).unwrap();
        assert!(!body.contains("AKIA"));
        assert!(body.contains("latencyMs"));
    }
}
