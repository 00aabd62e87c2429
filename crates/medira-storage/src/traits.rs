//! Storage abstraction trait
//!
//! This module defines the `Storage` trait that all object store backends
//! implement. The gateway owns no business logic: it moves bytes to and from
//! key-addressed durable storage.

use async_trait::async_trait;
use medira_core::config::StorageBackend;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Put failed: {0}")]
    PutFailed(String),

    #[error("Get failed: {0}")]
    GetFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether a retry could plausibly succeed. Missing objects, malformed
    /// keys, and bad configuration never heal on re-attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StorageError::NotFound(_) | StorageError::InvalidKey(_) | StorageError::ConfigError(_)
        )
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Opaque continuation token; pass back to `list` for the next page.
    pub next_token: Option<String>,
}

/// Object store gateway.
///
/// All backends (S3, local filesystem) implement this trait so the pipeline
/// can work against any key-addressed durable store without coupling to
/// provider details.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write an object. Overwrites are allowed at the trait level; the
    /// pipeline never reuses a key, so no reader observes a torn write.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Read an object in full.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys under a prefix, paged via an opaque continuation token.
    async fn list(&self, prefix: &str, token: Option<String>) -> StorageResult<KeyPage>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size in bytes of an object, if it exists.
    async fn content_length(&self, key: &str) -> StorageResult<u64>;

    /// Publicly dereferenceable URL for a key. Used as the unsigned fallback
    /// when CDN signing is unavailable.
    fn public_url(&self, key: &str) -> String;

    /// The storage backend type
    fn backend_type(&self) -> StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::PutFailed("reset".into()).is_transient());
        assert!(StorageError::BackendError("503".into()).is_transient());
        assert!(!StorageError::NotFound("k".into()).is_transient());
        assert!(!StorageError::InvalidKey("../k".into()).is_transient());
        assert!(!StorageError::ConfigError("no bucket".into()).is_transient());
    }
}
