//! Job queue: worker pool, retry state machine, stall reaping, and waiting.
//!
//! Shutdown: [`JobQueue::shutdown`] signals the pool to stop claiming; it
//! does not wait for in-flight jobs. Already-claimed jobs run to completion
//! or failure.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use medira_core::config::Config;
use medira_core::models::{
    Job, JobPayload, JobState, JobStatus, Priority, QueueStats, VariantRecord,
};

use crate::broker::{Broker, BrokerError, Delivery};
use crate::handler::{JobHandler, ProgressHandle};
use crate::store::JobStore;

/// Cap on the retry backoff so high attempt counts do not produce
/// excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Backoff before re-queueing after the given failed attempt (1-based):
/// exponential doubling from the base, capped.
#[inline]
pub(crate) fn compute_retry_backoff(base_secs: u64, attempt: u32) -> Duration {
    let secs = base_secs
        .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_RETRY_BACKOFF_SECS);
    Duration::from_secs(secs)
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Timed out waiting for job completion")]
    Timeout,

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Clone)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub default_timeout_secs: u64,
    pub completed_retention: usize,
    pub failed_retention: usize,
    /// Interval between stall reaper runs. 0 disables the reaper.
    pub stall_reap_interval_secs: u64,
    /// Grace added to each job's timeout before an active job counts as
    /// stalled.
    pub stall_grace_period_secs: u64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 500,
            max_attempts: 3,
            backoff_base_secs: 2,
            default_timeout_secs: 60,
            completed_retention: 100,
            failed_retention: 100,
            stall_reap_interval_secs: 30,
            stall_grace_period_secs: 30,
        }
    }
}

impl JobQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.queue_max_workers,
            poll_interval_ms: config.queue_poll_interval_ms,
            max_attempts: config.job_max_attempts,
            backoff_base_secs: config.retry_backoff_base_secs,
            default_timeout_secs: config.job_timeout_seconds,
            completed_retention: config.completed_retention,
            failed_retention: config.failed_retention,
            stall_reap_interval_secs: config.stall_reap_interval_secs,
            stall_grace_period_secs: config.stall_grace_period_secs,
        }
    }
}

pub struct JobQueue {
    broker: Arc<dyn Broker>,
    store: JobStore,
    config: JobQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Create a queue and start its worker pool.
    ///
    /// The handler is held weakly so the queue never keeps the application
    /// state alive; a dropped handler terminates jobs with an error instead
    /// of wedging them.
    pub fn new(
        broker: Arc<dyn Broker>,
        config: JobQueueConfig,
        handler: Weak<dyn JobHandler>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let store = JobStore::new(config.completed_retention, config.failed_retention);

        let broker_clone = Arc::clone(&broker);
        let store_clone = store.clone();
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::worker_pool(broker_clone, store_clone, config_clone, handler, shutdown_rx).await;
        });

        Self {
            broker,
            store,
            config,
            shutdown_tx,
        }
    }

    /// Submit a job. Returns immediately with the job id; the worker pool
    /// drives every later transition.
    #[tracing::instrument(skip(self, payload), fields(folder = %payload.folder, base_name = %payload.base_name))]
    pub async fn enqueue(
        &self,
        payload: JobPayload,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Uuid, QueueError> {
        let job = Job {
            id: Uuid::new_v4(),
            payload,
            state: JobState::Queued,
            priority: priority.as_i32(),
            attempt_count: 0,
            max_attempts: self.config.max_attempts,
            progress_percent: 0,
            result: None,
            last_error: None,
            timeout_seconds: timeout
                .map(|d| d.as_secs())
                .unwrap_or(self.config.default_timeout_secs),
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let id = job.id;

        self.store.insert(job).await;
        self.broker
            .enqueue(id, priority.as_i32(), Duration::ZERO)
            .await?;

        tracing::info!(job_id = %id, priority = priority.as_i32(), "Job submitted to queue");

        Ok(id)
    }

    /// Caller-facing job view, or `None` for unknown/evicted ids.
    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.store.status(id).await
    }

    /// Per-state job counts.
    pub async fn stats(&self) -> QueueStats {
        self.store.stats().await
    }

    /// Block until the job reaches a terminal state, up to `timeout`.
    ///
    /// A timeout only abandons the wait; the job keeps running and may still
    /// complete later.
    pub async fn await_completion(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<Vec<VariantRecord>, QueueError> {
        let mut rx = self
            .store
            .watch(id)
            .await
            .ok_or(QueueError::NotFound(id))?;

        let terminal = match tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal())).await
        {
            Err(_) => return Err(QueueError::Timeout),
            Ok(Ok(state)) => *state,
            // Watcher dropped: the record was evicted after going terminal.
            Ok(Err(_)) => return Err(QueueError::NotFound(id)),
        };

        let job = self.store.get(id).await.ok_or(QueueError::NotFound(id))?;
        if terminal == JobState::Completed {
            Ok(job.result.unwrap_or_default())
        } else {
            Err(QueueError::JobFailed(
                job.last_error
                    .unwrap_or_else(|| "job failed without error detail".to_string()),
            ))
        }
    }

    /// Signal the worker pool to stop claiming new jobs. Returns immediately;
    /// in-flight jobs continue until they complete or time out.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn worker_pool(
        broker: Arc<dyn Broker>,
        store: JobStore,
        config: JobQueueConfig,
        handler: Weak<dyn JobHandler>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            max_attempts = config.max_attempts,
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Stall reaper: requeue claimed-but-unfinished jobs so a crashed
        // worker never silently loses one.
        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stall_reap_interval_secs > 0 {
            let store_for_reaper = store.clone();
            let broker_for_reaper = Arc::clone(&broker);
            let reap_interval = Duration::from_secs(config.stall_reap_interval_secs);
            let grace = config.stall_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let stalled = store_for_reaper.reap_stalled(grace).await;
                            for (job_id, priority) in stalled {
                                tracing::warn!(job_id = %job_id, "Requeueing stalled job");
                                if let Err(e) = broker_for_reaper
                                    .enqueue(job_id, priority, Duration::ZERO)
                                    .await
                                {
                                    tracing::error!(error = %e, job_id = %job_id, "Failed to requeue stalled job");
                                }
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = broker.notified() => {
                    Self::claim_and_dispatch_one(&broker, &store, &config, &semaphore, &handler).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&broker, &store, &config, &semaphore, &handler).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        broker: &Arc<dyn Broker>,
        store: &JobStore,
        config: &JobQueueConfig,
        semaphore: &Arc<Semaphore>,
        handler: &Weak<dyn JobHandler>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match broker.dequeue().await {
            Ok(Some(delivery)) => {
                let Some(job) = store.mark_active(delivery.job_id).await else {
                    // Stale delivery: the job was evicted or already
                    // re-dispatched after a stall. Settle and move on.
                    tracing::debug!(job_id = %delivery.job_id, "Dropping stale delivery");
                    let _ = broker.ack(&delivery).await;
                    return;
                };

                let broker = Arc::clone(broker);
                let store = store.clone();
                let config = config.clone();
                let handler = handler.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    Self::process_job(job, delivery, broker, store, config, handler).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from broker");
            }
        }
    }

    #[tracing::instrument(skip_all, fields(job.id = %job.id, job.attempt = job.attempt_count))]
    async fn process_job(
        job: Job,
        delivery: Delivery,
        broker: Arc<dyn Broker>,
        store: JobStore,
        config: JobQueueConfig,
        handler: Weak<dyn JobHandler>,
    ) {
        let Some(handler) = handler.upgrade() else {
            tracing::error!(job_id = %job.id, "Job handler was dropped, failing job");
            store
                .mark_failed(job.id, "job handler unavailable".to_string())
                .await;
            let _ = broker.ack(&delivery).await;
            return;
        };

        let progress = ProgressHandle::new(store.clone(), job.id);
        let timeout = Duration::from_secs(job.timeout_seconds);

        let outcome = tokio::time::timeout(timeout, handler.run_job(&job, progress)).await;

        match outcome {
            Ok(Ok(records)) => {
                store.mark_completed(job.id, records).await;
                let _ = broker.ack(&delivery).await;
                tracing::info!(
                    job_id = %job.id,
                    attempt = job.attempt_count,
                    "Job completed successfully"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    attempt = job.attempt_count,
                    max_attempts = job.max_attempts,
                    recoverable = e.is_recoverable(),
                    "Job execution failed"
                );

                if !e.is_recoverable() {
                    store.mark_failed(job.id, e.to_string()).await;
                    let _ = broker.ack(&delivery).await;
                    return;
                }

                Self::retry_or_fail(&job, e.to_string(), &broker, &store, &config, &delivery)
                    .await;
            }
            Err(_) => {
                let message = format!(
                    "job execution timed out after {}s",
                    job.timeout_seconds
                );
                tracing::error!(
                    job_id = %job.id,
                    timeout_seconds = job.timeout_seconds,
                    "Job execution timed out"
                );
                Self::retry_or_fail(&job, message, &broker, &store, &config, &delivery).await;
            }
        }
    }

    async fn retry_or_fail(
        job: &Job,
        error: String,
        broker: &Arc<dyn Broker>,
        store: &JobStore,
        config: &JobQueueConfig,
        delivery: &Delivery,
    ) {
        if job.can_retry() {
            let backoff = compute_retry_backoff(config.backoff_base_secs, job.attempt_count);
            tracing::info!(
                job_id = %job.id,
                attempt = job.attempt_count,
                backoff_secs = backoff.as_secs(),
                "Scheduling job retry"
            );
            store.requeue(job.id).await;
            if let Err(e) = broker.nack(delivery, backoff).await {
                tracing::error!(error = %e, job_id = %job.id, "Failed to nack delivery");
            }
        } else {
            store.mark_failed(job.id, error).await;
            let _ = broker.ack(delivery).await;
            tracing::error!(job_id = %job.id, "Job failed after max attempts");
        }
    }
}

impl Clone for JobQueue {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            store: self.store.clone(),
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::handler::empty_handler_weak;
    use async_trait::async_trait;
    use bytes::Bytes;
    use medira_core::error::JobError;
    use medira_core::models::ProcessingOptions;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_payload() -> JobPayload {
        JobPayload {
            data: Bytes::from_static(b"bytes"),
            folder: "blog_images".to_string(),
            base_name: "abc".to_string(),
            options: ProcessingOptions::default(),
        }
    }

    fn fast_config() -> JobQueueConfig {
        JobQueueConfig {
            max_workers: 2,
            poll_interval_ms: 10,
            backoff_base_secs: 0,
            stall_reap_interval_secs: 0,
            ..JobQueueConfig::default()
        }
    }

    /// Fails the first `fail_count` attempts with a recoverable error.
    struct FlakyHandler {
        fail_count: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(fail_count: u32) -> Self {
            Self {
                fail_count,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn run_job(
            self: Arc<Self>,
            _job: &Job,
            progress: ProgressHandle,
        ) -> Result<Vec<VariantRecord>, JobError> {
            progress.checkpoint(10).await;
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                return Err(JobError::recoverable(anyhow::anyhow!("transient failure")));
            }
            progress.checkpoint(50).await;
            progress.checkpoint(90).await;
            Ok(vec![])
        }
    }

    struct UnrecoverableHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for UnrecoverableHandler {
        async fn run_job(
            self: Arc<Self>,
            _job: &Job,
            _progress: ProgressHandle,
        ) -> Result<Vec<VariantRecord>, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(JobError::unrecoverable(anyhow::anyhow!(
                "undecodable input"
            )))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn run_job(
            self: Arc<Self>,
            _job: &Job,
            progress: ProgressHandle,
        ) -> Result<Vec<VariantRecord>, JobError> {
            progress.checkpoint(10).await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(compute_retry_backoff(2, 1), Duration::from_secs(2));
        assert_eq!(compute_retry_backoff(2, 2), Duration::from_secs(4));
        assert_eq!(compute_retry_backoff(2, 3), Duration::from_secs(8));
        assert_eq!(
            compute_retry_backoff(2, 32),
            Duration::from_secs(MAX_RETRY_BACKOFF_SECS)
        );
    }

    #[tokio::test]
    async fn test_successful_job_completes_first_attempt() {
        let handler: Arc<dyn JobHandler> = Arc::new(FlakyHandler::new(0));
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        queue
            .await_completion(id, Duration::from_secs(5))
            .await
            .unwrap();

        let status = queue.status(id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.attempt_count, 1);
        assert_eq!(status.progress_percent, 100);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_to_success() {
        let handler = Arc::new(FlakyHandler::new(2));
        let handler_dyn: Arc<dyn JobHandler> = handler.clone();
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler_dyn),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        queue
            .await_completion(id, Duration::from_secs(5))
            .await
            .unwrap();

        let status = queue.status(id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.attempt_count, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_frozen_progress() {
        let handler = Arc::new(FlakyHandler::new(u32::MAX));
        let handler_dyn: Arc<dyn JobHandler> = handler.clone();
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler_dyn),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        let result = queue.await_completion(id, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(QueueError::JobFailed(_))));

        let status = queue.status(id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempt_count, 3);
        assert!(status.last_error.is_some());
        // Frozen at the last successful checkpoint, not forced to 100.
        assert_eq!(status.progress_percent, 10);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unrecoverable_error_fails_without_retry() {
        let handler = Arc::new(UnrecoverableHandler {
            calls: AtomicU32::new(0),
        });
        let handler_dyn: Arc<dyn JobHandler> = handler.clone();
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler_dyn),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        let result = queue.await_completion(id, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(QueueError::JobFailed(_))));

        let status = queue.status(id).await.unwrap();
        assert_eq!(status.attempt_count, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_await_timeout_leaves_job_running() {
        let handler: Arc<dyn JobHandler> = Arc::new(SlowHandler);
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        let result = queue
            .await_completion(id, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(QueueError::Timeout)));

        // The abandoned job is still tracked and still active.
        let status = queue.status(id).await.unwrap();
        assert!(matches!(status.state, JobState::Active | JobState::Queued));
    }

    #[tokio::test]
    async fn test_job_hard_timeout_drives_retries_then_failure() {
        let handler: Arc<dyn JobHandler> = Arc::new(SlowHandler);
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, Some(Duration::ZERO))
            .await
            .unwrap();
        let result = queue.await_completion(id, Duration::from_secs(5)).await;

        match result {
            Err(QueueError::JobFailed(message)) => {
                assert!(message.contains("timed out"), "got: {}", message)
            }
            other => panic!("expected JobFailed, got {:?}", other.map(|_| ())),
        }
        let status = queue.status(id).await.unwrap();
        assert_eq!(status.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_stats_reflect_terminal_states() {
        let handler: Arc<dyn JobHandler> = Arc::new(FlakyHandler::new(0));
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            Arc::downgrade(&handler),
        );

        let a = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        let b = queue
            .enqueue(test_payload(), Priority::High, None)
            .await
            .unwrap();

        queue.await_completion(a, Duration::from_secs(5)).await.unwrap();
        queue.await_completion(b, Duration::from_secs(5)).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_status_unknown_job_is_none() {
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            empty_handler_weak(),
        );
        assert!(queue.status(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_handler_fails_job() {
        let queue = JobQueue::new(
            Arc::new(MemoryBroker::new()),
            fast_config(),
            empty_handler_weak(),
        );

        let id = queue
            .enqueue(test_payload(), Priority::Normal, None)
            .await
            .unwrap();
        let result = queue.await_completion(id, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(QueueError::JobFailed(_))));
    }
}
