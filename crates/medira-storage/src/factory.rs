use crate::{LocalStorage, RetryingStorage, S3Storage, Storage, StorageError, StorageResult};
use medira_core::config::{Config, StorageBackend};
use std::sync::Arc;

/// Create a storage gateway from configuration.
///
/// The selected backend is wrapped in [`RetryingStorage`] so every consumer
/// gets the same bounded-retry behavior.
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let backend: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config.s3_region.clone().ok_or_else(|| {
                StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
            })?;
            let endpoint = config.s3_endpoint.clone();

            Arc::new(S3Storage::new(bucket, region, endpoint)?)
        }
        StorageBackend::Local => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;
            let base_url = config.local_storage_base_url.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_BASE_URL not configured".to_string())
            })?;

            Arc::new(LocalStorage::new(base_path, base_url).await?)
        }
    };

    Ok(Arc::new(RetryingStorage::new(
        backend,
        config.storage_retry_attempts,
        config.storage_retry_base_ms,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_factory() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_backend: StorageBackend::Local,
            local_storage_path: Some(dir.path().to_string_lossy().to_string()),
            local_storage_base_url: Some("http://localhost:3000/media".to_string()),
            ..Config::default()
        };

        let storage = create_storage(&config).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Local);
    }

    #[tokio::test]
    async fn test_local_factory_requires_path() {
        let config = Config {
            storage_backend: StorageBackend::Local,
            ..Config::default()
        };

        let result = create_storage(&config).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
