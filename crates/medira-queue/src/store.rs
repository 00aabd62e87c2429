//! In-memory job records.
//!
//! Authoritative state for every job the queue knows about: the state
//! machine, attempt counts, progress, results, and the bounded retention of
//! terminal jobs. The broker only ever sees job ids.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use medira_core::models::{Job, JobState, JobStatus, QueueStats, VariantRecord};

struct StoreInner {
    jobs: HashMap<Uuid, Job>,
    watchers: HashMap<Uuid, watch::Sender<JobState>>,
    completed_order: VecDeque<Uuid>,
    failed_order: VecDeque<Uuid>,
}

/// Shared job record store.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<RwLock<StoreInner>>,
    completed_retention: usize,
    failed_retention: usize,
}

impl JobStore {
    pub fn new(completed_retention: usize, failed_retention: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                jobs: HashMap::new(),
                watchers: HashMap::new(),
                completed_order: VecDeque::new(),
                failed_order: VecDeque::new(),
            })),
            completed_retention: completed_retention.max(1),
            failed_retention: failed_retention.max(1),
        }
    }

    pub async fn insert(&self, job: Job) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let (tx, _rx) = watch::channel(job.state);
        inner.watchers.insert(job.id, tx);
        inner.jobs.insert(job.id, job);
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.read().await.jobs.get(&id).cloned()
    }

    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.inner.read().await.jobs.get(&id).map(JobStatus::from)
    }

    /// Subscribe to state changes for one job.
    pub async fn watch(&self, id: Uuid) -> Option<watch::Receiver<JobState>> {
        self.inner
            .read()
            .await
            .watchers
            .get(&id)
            .map(|tx| tx.subscribe())
    }

    /// Claim a queued job: `Queued → Active`, attempt count incremented.
    /// Returns the updated record, or `None` if the job is unknown or not
    /// claimable (e.g. already terminal after a stall race).
    pub async fn mark_active(&self, id: Uuid) -> Option<Job> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let job = inner.jobs.get_mut(&id)?;
        if job.state != JobState::Queued {
            return None;
        }
        job.state = JobState::Active;
        job.attempt_count += 1;
        job.started_at = Some(Utc::now());
        let snapshot = job.clone();
        if let Some(tx) = inner.watchers.get(&id) {
            let _ = tx.send_replace(JobState::Active);
        }
        Some(snapshot)
    }

    /// Return a failed attempt to the queue: `Active → Queued`.
    ///
    /// Intermediate failures are never externally visible; only terminal
    /// exhaustion reaches `Failed`.
    pub async fn requeue(&self, id: Uuid) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.state = JobState::Queued;
            job.started_at = None;
            if let Some(tx) = inner.watchers.get(&id) {
                let _ = tx.send_replace(JobState::Queued);
            }
        }
    }

    pub async fn mark_completed(&self, id: Uuid, result: Vec<VariantRecord>) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.state = JobState::Completed;
            job.result = Some(result);
            job.progress_percent = 100;
            job.finished_at = Some(Utc::now());
            if let Some(tx) = inner.watchers.get(&id) {
                let _ = tx.send_replace(JobState::Completed);
            }
            inner.completed_order.push_back(id);
            Self::evict(
                &mut inner.completed_order,
                self.completed_retention,
                &mut inner.jobs,
                &mut inner.watchers,
            );
        }
    }

    /// Terminal failure. Progress is left frozen at the last successful
    /// checkpoint.
    pub async fn mark_failed(&self, id: Uuid, error: String) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.state = JobState::Failed;
            job.last_error = Some(error);
            job.finished_at = Some(Utc::now());
            if let Some(tx) = inner.watchers.get(&id) {
                let _ = tx.send_replace(JobState::Failed);
            }
            inner.failed_order.push_back(id);
            Self::evict(
                &mut inner.failed_order,
                self.failed_retention,
                &mut inner.jobs,
                &mut inner.watchers,
            );
        }
    }

    /// Monotone progress update; a lower value than the current one is
    /// ignored.
    pub async fn set_progress(&self, id: Uuid, percent: u8) {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(&id) {
            let percent = percent.min(100);
            if percent > job.progress_percent {
                job.progress_percent = percent;
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.read().await;
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Requeue active jobs whose worker stopped reporting: anything claimed
    /// longer ago than its own timeout plus `grace_secs`. Returns the
    /// requeued (job_id, priority) pairs so the caller can re-enqueue them
    /// with the broker.
    pub async fn reap_stalled(&self, grace_secs: u64) -> Vec<(Uuid, i32)> {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let mut stalled = Vec::new();

        for job in inner.jobs.values_mut() {
            if job.state != JobState::Active {
                continue;
            }
            let Some(started_at) = job.started_at else {
                continue;
            };
            let deadline = started_at
                + chrono::Duration::seconds((job.timeout_seconds + grace_secs) as i64);
            if now >= deadline {
                job.state = JobState::Queued;
                job.started_at = None;
                stalled.push((job.id, job.priority));
            }
        }

        for (id, _) in &stalled {
            if let Some(tx) = inner.watchers.get(id) {
                let _ = tx.send_replace(JobState::Queued);
            }
        }

        stalled
    }

    fn evict(
        order: &mut VecDeque<Uuid>,
        retention: usize,
        jobs: &mut HashMap<Uuid, Job>,
        watchers: &mut HashMap<Uuid, watch::Sender<JobState>>,
    ) {
        while order.len() > retention {
            if let Some(oldest) = order.pop_front() {
                jobs.remove(&oldest);
                watchers.remove(&oldest);
            }
        }
    }
}
