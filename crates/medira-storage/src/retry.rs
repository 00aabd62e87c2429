//! Bounded-retry decorator for storage backends.
//!
//! Wraps any [`Storage`] and re-attempts transient failures with capped
//! exponential backoff. Non-transient errors (missing objects, invalid keys,
//! bad configuration) surface immediately.

use crate::traits::{KeyPage, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use medira_core::config::StorageBackend;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Maximum backoff between storage retries.
const MAX_RETRY_BACKOFF_MS: u64 = 5_000;

/// Backoff in milliseconds before the given re-attempt (1-based).
#[inline]
fn retry_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms
        .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_RETRY_BACKOFF_MS)
}

#[derive(Clone)]
pub struct RetryingStorage {
    inner: Arc<dyn Storage>,
    max_attempts: u32,
    base_backoff_ms: u64,
}

impl RetryingStorage {
    pub fn new(inner: Arc<dyn Storage>, max_attempts: u32, base_backoff_ms: u64) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_backoff_ms,
        }
    }

    async fn retrying<T, Fut>(
        &self,
        op: &'static str,
        key: &str,
        mut attempt_fn: impl FnMut() -> Fut,
    ) -> StorageResult<T>
    where
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let backoff_ms = retry_backoff_ms(self.base_backoff_ms, attempt);
                    tracing::warn!(
                        error = %e,
                        op = op,
                        key = %key,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff_ms,
                        "Transient storage failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Storage for RetryingStorage {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.retrying("put", key, || {
            self.inner.put(key, data.clone(), content_type)
        })
        .await
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.retrying("get", key, || self.inner.get(key)).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.retrying("delete", key, || self.inner.delete(key)).await
    }

    async fn list(&self, prefix: &str, token: Option<String>) -> StorageResult<KeyPage> {
        self.retrying("list", prefix, || self.inner.list(prefix, token.clone()))
            .await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.retrying("exists", key, || self.inner.exists(key)).await
    }

    async fn content_length(&self, key: &str) -> StorageResult<u64> {
        self.retrying("content_length", key, || self.inner.content_length(key))
            .await
    }

    fn public_url(&self, key: &str) -> String {
        self.inner.public_url(key)
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `fail_count` puts/gets with a transient error.
    struct FlakyStorage {
        fail_count: u32,
        calls: AtomicU32,
    }

    impl FlakyStorage {
        fn new(fail_count: u32) -> Self {
            Self {
                fail_count,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn put(&self, _key: &str, _data: Vec<u8>, _ct: &str) -> StorageResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                Err(StorageError::PutFailed("connection reset".to_string()))
            } else {
                Ok(())
            }
        }

        async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn list(&self, _prefix: &str, _token: Option<String>) -> StorageResult<KeyPage> {
            Ok(KeyPage::default())
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn content_length(&self, key: &str) -> StorageResult<u64> {
            Err(StorageError::NotFound(key.to_string()))
        }

        fn public_url(&self, key: &str) -> String {
            format!("http://storage.test/{}", key)
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::Local
        }
    }

    #[test]
    fn test_backoff_exponential_then_capped() {
        assert_eq!(retry_backoff_ms(200, 1), 200);
        assert_eq!(retry_backoff_ms(200, 2), 400);
        assert_eq!(retry_backoff_ms(200, 3), 800);
        assert_eq!(retry_backoff_ms(200, 10), MAX_RETRY_BACKOFF_MS);
    }

    #[tokio::test]
    async fn test_transient_put_retried_to_success() {
        let flaky = Arc::new(FlakyStorage::new(2));
        let storage = RetryingStorage::new(flaky.clone(), 3, 1);

        storage
            .put("k.jpg", b"data".to_vec(), "image/jpeg")
            .await
            .unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_error() {
        let flaky = Arc::new(FlakyStorage::new(10));
        let storage = RetryingStorage::new(flaky.clone(), 3, 1);

        let result = storage.put("k.jpg", b"data".to_vec(), "image/jpeg").await;
        assert!(matches!(result, Err(StorageError::PutFailed(_))));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let flaky = Arc::new(FlakyStorage::new(0));
        let storage = RetryingStorage::new(flaky, 3, 1);

        let result = storage.get("missing.jpg").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
