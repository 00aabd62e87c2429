//! Job handler: executes generate + store as a single unit of work.
//!
//! The queue dispatches claimed jobs here. Undecodable input is classified
//! unrecoverable (it will not change on re-attempt); transform and transient
//! storage failures are recoverable and drive the queue's retry policy.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

use medira_core::error::JobError;
use medira_core::keys::variant_key;
use medira_core::models::{Job, VariantRecord};
use medira_processing::{GenerateError, GeneratedSet, VariantGenerator};
use medira_queue::{
    JobHandler, ProgressHandle, PROGRESS_GENERATION_DONE, PROGRESS_GENERATION_STARTED,
    PROGRESS_STORAGE_DONE,
};
use medira_storage::{Storage, StorageError};

/// Canonical content type for every stored variant.
pub(crate) const CANONICAL_CONTENT_TYPE: &str = "image/jpeg";

pub struct UploadJobHandler {
    storage: Arc<dyn Storage>,
    generator: Arc<VariantGenerator>,
}

impl UploadJobHandler {
    pub fn new(storage: Arc<dyn Storage>, generator: Arc<VariantGenerator>) -> Self {
        Self { storage, generator }
    }
}

#[async_trait]
impl JobHandler for UploadJobHandler {
    async fn run_job(
        self: Arc<Self>,
        job: &Job,
        progress: ProgressHandle,
    ) -> Result<Vec<VariantRecord>, JobError> {
        progress.checkpoint(PROGRESS_GENERATION_STARTED).await;

        let set = self
            .generator
            .generate(&job.payload.data, &job.payload.options)
            .await
            .map_err(|e| match e {
                GenerateError::Validation(v) => JobError::unrecoverable(v),
                GenerateError::Transform(t) => JobError::recoverable(t),
            })?;

        progress.checkpoint(PROGRESS_GENERATION_DONE).await;

        let records = store_variants(
            &self.storage,
            &job.payload.folder,
            &job.payload.base_name,
            &set,
        )
        .await
        .map_err(|e| {
            if e.is_transient() {
                JobError::recoverable(e)
            } else {
                JobError::unrecoverable(e)
            }
        })?;

        progress.checkpoint(PROGRESS_STORAGE_DONE).await;

        Ok(records)
    }
}

/// Persist a generated set all-or-nothing.
///
/// Variants are written concurrently; if any write fails, the keys that did
/// land are best-effort deleted so no partial set is ever advertised. Keys
/// are never reused, so readers see either the full set or not-found.
pub(crate) async fn store_variants(
    storage: &Arc<dyn Storage>,
    folder: &str,
    base_name: &str,
    set: &GeneratedSet,
) -> Result<Vec<VariantRecord>, StorageError> {
    let puts = set.variants.iter().map(|generated| {
        let key = variant_key(folder, base_name, generated.variant);
        async move {
            storage
                .put(&key, generated.data.to_vec(), CANONICAL_CONTENT_TYPE)
                .await
                .map(|_| VariantRecord {
                    variant: generated.variant,
                    storage_key: key,
                    width: generated.width,
                    height: generated.height,
                    byte_size: generated.data.len() as u64,
                    content_type: CANONICAL_CONTENT_TYPE.to_string(),
                })
        }
    });

    let mut records = Vec::new();
    let mut first_error = None;
    for result in join_all(puts).await {
        match result {
            Ok(record) => records.push(record),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }

    if let Some(error) = first_error {
        for record in &records {
            if let Err(e) = storage.delete(&record.storage_key).await {
                tracing::warn!(
                    error = %e,
                    key = %record.storage_key,
                    "Rollback delete failed after partial variant write"
                );
            }
        }
        tracing::error!(
            error = %error,
            folder = %folder,
            base_name = %base_name,
            written = records.len(),
            total = set.variants.len(),
            "Variant batch write failed, rolled back partial set"
        );
        return Err(error);
    }

    Ok(records)
}
