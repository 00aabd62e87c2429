use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::media::{ProcessingOptions, VariantRecord};

/// Job lifecycle state.
///
/// `Queued → Active → Completed | Failed`. A failed attempt re-enters
/// `Queued` until attempts are exhausted; `Failed` is only ever the terminal
/// state, so callers polling at completion boundaries never observe an
/// intermediate failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(anyhow::anyhow!("Invalid job state: {}", s)),
        }
    }
}

/// Queue ordering priority. Lower numbers dequeue first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High = 0,
    #[default]
    Normal = 5,
    Low = 9,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            i32::MIN..=2 => Priority::High,
            3..=6 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as i32
    }
}

/// The unit of queued work: source bytes plus everything needed to derive
/// storage keys and run the generator.
#[derive(Debug, Clone)]
pub struct JobPayload {
    pub data: Bytes,
    pub folder: String,
    pub base_name: String,
    pub options: ProcessingOptions,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub state: JobState,
    pub priority: i32,
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Monotonically non-decreasing within an attempt; frozen at the last
    /// successful checkpoint on terminal failure.
    pub progress_percent: u8,
    pub result: Option<Vec<VariantRecord>>,
    pub last_error: Option<String>,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// Caller-facing job view: everything except the payload bytes.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub state: JobState,
    pub priority: i32,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub progress_percent: u8,
    pub result: Option<Vec<VariantRecord>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            priority: job.priority,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            progress_percent: job.progress_percent,
            result: job.result.clone(),
            last_error: job.last_error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_display_round_trip() {
        for state in [
            JobState::Queued,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_priority_lower_number_dequeues_first() {
        assert!(Priority::High.as_i32() < Priority::Normal.as_i32());
        assert!(Priority::Normal.as_i32() < Priority::Low.as_i32());
    }

    #[test]
    fn test_priority_from_i32() {
        assert_eq!(Priority::from_i32(0), Priority::High);
        assert_eq!(Priority::from_i32(2), Priority::High);
        assert_eq!(Priority::from_i32(5), Priority::Normal);
        assert_eq!(Priority::from_i32(9), Priority::Low);
        assert_eq!(Priority::from_i32(100), Priority::Low);
    }

    #[test]
    fn test_job_can_retry() {
        let mut job = Job {
            id: Uuid::new_v4(),
            payload: JobPayload {
                data: Bytes::new(),
                folder: "blog_images".to_string(),
                base_name: "abc".to_string(),
                options: ProcessingOptions::default(),
            },
            state: JobState::Queued,
            priority: Priority::Normal.as_i32(),
            attempt_count: 2,
            max_attempts: 3,
            progress_percent: 0,
            result: None,
            last_error: None,
            timeout_seconds: 60,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        assert!(job.can_retry());
        job.attempt_count = 3;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_job_status_omits_payload() {
        let job = Job {
            id: Uuid::new_v4(),
            payload: JobPayload {
                data: Bytes::from_static(b"image bytes"),
                folder: "receipts".to_string(),
                base_name: "def".to_string(),
                options: ProcessingOptions {
                    include_original: true,
                },
            },
            state: JobState::Completed,
            priority: Priority::High.as_i32(),
            attempt_count: 1,
            max_attempts: 3,
            progress_percent: 100,
            result: Some(vec![]),
            last_error: None,
            timeout_seconds: 60,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        };

        let status = JobStatus::from(&job);
        assert_eq!(status.id, job.id);
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress_percent, 100);
        let encoded = serde_json::to_string(&status).unwrap();
        assert!(!encoded.contains("image bytes"));
    }
}
