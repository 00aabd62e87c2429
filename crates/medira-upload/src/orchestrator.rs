//! Upload orchestrator.
//!
//! The caller-facing entry point. Decides per call whether to enqueue a
//! background job (optimistic), run the full pipeline inline (sync), or run a
//! reduced single-pass path (quick).

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use medira_core::config::Config;
use medira_core::keys::{canonical_key, sanitize_folder, variant_key};
use medira_core::models::{
    JobPayload, JobStatus, MediaAsset, Priority, ProcessingOptions, UploadResult, UploadStrategy,
    VariantName, VariantRecord,
};
use medira_delivery::UrlResolver;
use medira_processing::{
    GenerateError, ImageValidator, TransformError, ValidationError, VariantGenerator,
};
use medira_queue::{Broker, JobHandler, JobQueue, JobQueueConfig, QueueError};
use medira_storage::{Storage, StorageError};
use uuid::Uuid;

use crate::handler::{store_variants, UploadJobHandler, CANONICAL_CONTENT_TYPE};

/// Per-variant encode parallelism inside one upload or job.
const VARIANT_CONCURRENCY: usize = 4;

/// JPEG quality for the quick path's single re-encode.
const QUICK_QUALITY: u8 = 80;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<GenerateError> for UploadError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::Validation(e) => UploadError::Validation(e),
            GenerateError::Transform(e) => UploadError::Transform(e),
        }
    }
}

/// Per-upload options.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Generate the archival-quality original variant (OCR-grade flows only).
    pub include_original: bool,
    pub priority: Priority,
}

impl UploadOptions {
    fn processing(&self) -> ProcessingOptions {
        ProcessingOptions {
            include_original: self.include_original,
        }
    }
}

/// The upload orchestrator.
pub struct MediaUploader {
    storage: Arc<dyn Storage>,
    generator: Arc<VariantGenerator>,
    queue: JobQueue,
    resolver: UrlResolver,
    validator: ImageValidator,
    quick_max_width: u32,
    // Keeps the job handler alive; the queue only holds a weak reference.
    _handler: Arc<UploadJobHandler>,
}

impl MediaUploader {
    /// Wire the full pipeline: generator, job handler, worker pool.
    pub fn new(
        config: &Config,
        storage: Arc<dyn Storage>,
        broker: Arc<dyn Broker>,
        resolver: UrlResolver,
    ) -> Self {
        let generator = Arc::new(VariantGenerator::new(VARIANT_CONCURRENCY));
        let handler = Arc::new(UploadJobHandler::new(
            Arc::clone(&storage),
            Arc::clone(&generator),
        ));
        let handler_dyn: Arc<dyn JobHandler> = handler.clone();
        let queue = JobQueue::new(
            broker,
            JobQueueConfig::from_config(config),
            Arc::downgrade(&handler_dyn),
        );

        Self {
            storage,
            generator,
            queue,
            resolver,
            validator: ImageValidator::new(config.max_upload_bytes),
            quick_max_width: config.quick_max_width,
            _handler: handler,
        }
    }

    /// Upload an image with the chosen strategy.
    ///
    /// Validation failures carry no side effects. Transform and storage
    /// failures propagate directly on the sync/quick paths; the optimistic
    /// path only ever surfaces them through [`job_status`].
    ///
    /// [`job_status`]: MediaUploader::job_status
    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len(), strategy = %strategy))]
    pub async fn upload(
        &self,
        data: &[u8],
        folder: &str,
        strategy: UploadStrategy,
        options: UploadOptions,
    ) -> Result<UploadResult, UploadError> {
        let folder = sanitize_folder(folder);
        let info = self.validator.validate(data)?;
        let base_name = MediaAsset::new_base_name();

        let asset = MediaAsset {
            base_name: base_name.clone(),
            folder: folder.clone(),
            source_format: info.format.clone(),
            original_width: info.width,
            original_height: info.height,
            source_size_bytes: info.size_bytes,
        };

        match strategy {
            UploadStrategy::Optimistic => {
                let job_id = self
                    .queue
                    .enqueue(
                        JobPayload {
                            data: Bytes::copy_from_slice(data),
                            folder: folder.clone(),
                            base_name: base_name.clone(),
                            options: options.processing(),
                        },
                        options.priority,
                        None,
                    )
                    .await?;

                // Placeholder URLs are valid once the background job lands;
                // before that they dereference to not-found.
                let placeholder_urls = options
                    .processing()
                    .requested_variants()
                    .into_iter()
                    .map(|variant| {
                        let key = variant_key(&folder, &base_name, variant);
                        (variant, self.resolver.resolve(&key, None))
                    })
                    .collect();

                tracing::info!(
                    job_id = %job_id,
                    base_name = %base_name,
                    "Optimistic upload enqueued"
                );

                Ok(UploadResult::Processing {
                    job_id,
                    base_name,
                    placeholder_urls,
                })
            }
            UploadStrategy::Sync => {
                let set = self
                    .generator
                    .generate(data, &options.processing())
                    .await?;
                let records =
                    store_variants(&self.storage, &folder, &base_name, &set).await?;
                let urls = self.record_urls(&records);

                tracing::info!(
                    base_name = %base_name,
                    variant_count = records.len(),
                    "Sync upload stored"
                );

                Ok(UploadResult::Completed {
                    asset,
                    variants: records,
                    urls,
                })
            }
            UploadStrategy::Quick => {
                let out = self
                    .generator
                    .resize_bounded(data, self.quick_max_width, QUICK_QUALITY)
                    .await?;
                let key = canonical_key(&folder, &base_name);
                self.storage
                    .put(&key, out.data.to_vec(), CANONICAL_CONTENT_TYPE)
                    .await?;

                let record = VariantRecord {
                    variant: out.variant,
                    storage_key: key.clone(),
                    width: out.width,
                    height: out.height,
                    byte_size: out.data.len() as u64,
                    content_type: CANONICAL_CONTENT_TYPE.to_string(),
                };
                let urls = vec![(record.variant, self.resolver.resolve(&key, None))];

                tracing::info!(base_name = %base_name, key = %key, "Quick upload stored");

                Ok(UploadResult::Completed {
                    asset,
                    variants: vec![record],
                    urls,
                })
            }
        }
    }

    /// Resolve a stored key (optionally substituting a sibling variant) into
    /// a delivery URL.
    pub fn resolve(&self, storage_key: &str, variant: Option<VariantName>) -> String {
        self.resolver.resolve(storage_key, variant)
    }

    /// Caller-facing job view.
    pub async fn job_status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.queue.status(job_id).await
    }

    /// Block until an optimistic upload's job reaches a terminal state.
    pub async fn await_completion(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> Result<Vec<VariantRecord>, QueueError> {
        self.queue.await_completion(job_id, timeout).await
    }

    /// Queue statistics.
    pub async fn queue_stats(&self) -> medira_core::models::QueueStats {
        self.queue.stats().await
    }

    fn record_urls(&self, records: &[VariantRecord]) -> Vec<(VariantName, String)> {
        records
            .iter()
            .map(|r| (r.variant, self.resolver.resolve(&r.storage_key, None)))
            .collect()
    }
}
