//! Job handler seam.
//!
//! The upload layer implements [`JobHandler`] for its application state. The
//! worker holds a weak reference and calls `run_job` when processing a
//! claimed job; the handler reports coarse progress through the
//! [`ProgressHandle`] so polling callers can render an indicator without
//! fine-grained instrumentation.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use medira_core::error::JobError;
use medira_core::models::{Job, VariantRecord};

use crate::store::JobStore;

/// Checkpoint: variant generation has begun.
pub const PROGRESS_GENERATION_STARTED: u8 = 10;
/// Checkpoint: all variants generated, none stored yet.
pub const PROGRESS_GENERATION_DONE: u8 = 50;
/// Checkpoint: all variants durably stored. The store pins terminal
/// completion at 100.
pub const PROGRESS_STORAGE_DONE: u8 = 90;

/// Executes one job (generate + store as a single unit of work).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run_job(
        self: Arc<Self>,
        job: &Job,
        progress: ProgressHandle,
    ) -> Result<Vec<VariantRecord>, JobError>;
}

/// Reports progress checkpoints for one job. Progress is clamped monotone by
/// the store, so a retried attempt can never appear to move backwards.
#[derive(Clone)]
pub struct ProgressHandle {
    store: JobStore,
    job_id: Uuid,
}

impl ProgressHandle {
    pub(crate) fn new(store: JobStore, job_id: Uuid) -> Self {
        Self { store, job_id }
    }

    pub async fn checkpoint(&self, percent: u8) {
        self.store.set_progress(self.job_id, percent).await;
    }
}

/// Placeholder handler used when no real handler exists yet (e.g. during
/// initialization). Always fails unrecoverably.
struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn run_job(
        self: Arc<Self>,
        _job: &Job,
        _progress: ProgressHandle,
    ) -> Result<Vec<VariantRecord>, JobError> {
        Err(JobError::unrecoverable(anyhow::anyhow!(
            "NoopHandler: no job handler available"
        )))
    }
}

/// Weak reference to a no-op handler, for wiring order during startup.
pub fn empty_handler_weak() -> Weak<dyn JobHandler> {
    let h: Arc<dyn JobHandler> = Arc::new(NoopHandler);
    Arc::downgrade(&h)
}
