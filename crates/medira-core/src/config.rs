//! Configuration module
//!
//! Environment-driven configuration for the media pipeline: storage backend
//! selection, CDN delivery/signing, queue tuning, and upload limits.

use std::env;
use std::str::FromStr;

const DEFAULT_QUEUE_MAX_WORKERS: usize = 4;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_BASE_SECS: u64 = 2;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TERMINAL_RETENTION: usize = 100;
const DEFAULT_STALL_REAP_INTERVAL_SECS: u64 = 30;
const DEFAULT_STALL_GRACE_PERIOD_SECS: u64 = 30;
const DEFAULT_URL_EXPIRY_SECS: u64 = 86_400;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const DEFAULT_QUICK_MAX_WIDTH: u32 = 1200;
const DEFAULT_STORAGE_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_STORAGE_RETRY_BASE_MS: u64 = 200;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

/// Application configuration for the media pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    // Storage
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, Spaces, ...).
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub storage_retry_attempts: u32,
    pub storage_retry_base_ms: u64,

    // Delivery
    pub cdn_domain: Option<String>,
    pub cdn_signing_secret: Option<String>,
    pub cdn_key_pair_id: Option<String>,
    pub url_expiry_seconds: u64,

    // Queue
    pub queue_max_workers: usize,
    pub queue_poll_interval_ms: u64,
    pub job_max_attempts: u32,
    pub retry_backoff_base_secs: u64,
    pub job_timeout_seconds: u64,
    /// Bounded retention for terminal jobs, per state (count, not time).
    pub completed_retention: usize,
    pub failed_retention: usize,
    /// Interval between stall reaper runs. 0 disables the reaper.
    pub stall_reap_interval_secs: u64,
    /// Grace added to the job timeout before an active job counts as stalled.
    pub stall_grace_period_secs: u64,

    // Upload
    pub max_upload_bytes: usize,
    pub quick_max_width: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::S3,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: None,
            local_storage_base_url: None,
            storage_retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
            storage_retry_base_ms: DEFAULT_STORAGE_RETRY_BASE_MS,
            cdn_domain: None,
            cdn_signing_secret: None,
            cdn_key_pair_id: None,
            url_expiry_seconds: DEFAULT_URL_EXPIRY_SECS,
            queue_max_workers: DEFAULT_QUEUE_MAX_WORKERS,
            queue_poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
            job_max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
            retry_backoff_base_secs: DEFAULT_RETRY_BACKOFF_BASE_SECS,
            job_timeout_seconds: DEFAULT_JOB_TIMEOUT_SECS,
            completed_retention: DEFAULT_TERMINAL_RETENTION,
            failed_retention: DEFAULT_TERMINAL_RETENTION,
            stall_reap_interval_secs: DEFAULT_STALL_REAP_INTERVAL_SECS,
            stall_grace_period_secs: DEFAULT_STALL_GRACE_PERIOD_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            quick_max_width: DEFAULT_QUICK_MAX_WIDTH,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let defaults = Config::default();

        let storage_backend = match env_opt("STORAGE_BACKEND") {
            Some(v) => v.parse()?,
            None => defaults.storage_backend,
        };

        let config = Config {
            storage_backend,
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            local_storage_base_url: env_opt("LOCAL_STORAGE_BASE_URL"),
            storage_retry_attempts: env_parse(
                "STORAGE_RETRY_ATTEMPTS",
                defaults.storage_retry_attempts,
            ),
            storage_retry_base_ms: env_parse(
                "STORAGE_RETRY_BASE_MS",
                defaults.storage_retry_base_ms,
            ),
            cdn_domain: env_opt("CDN_DOMAIN"),
            cdn_signing_secret: env_opt("CDN_SIGNING_SECRET"),
            cdn_key_pair_id: env_opt("CDN_KEY_PAIR_ID"),
            url_expiry_seconds: env_parse("URL_EXPIRY_SECONDS", defaults.url_expiry_seconds),
            queue_max_workers: env_parse("QUEUE_MAX_WORKERS", defaults.queue_max_workers),
            queue_poll_interval_ms: env_parse(
                "QUEUE_POLL_INTERVAL_MS",
                defaults.queue_poll_interval_ms,
            ),
            job_max_attempts: env_parse("JOB_MAX_ATTEMPTS", defaults.job_max_attempts),
            retry_backoff_base_secs: env_parse(
                "RETRY_BACKOFF_BASE_SECS",
                defaults.retry_backoff_base_secs,
            ),
            job_timeout_seconds: env_parse("JOB_TIMEOUT_SECONDS", defaults.job_timeout_seconds),
            completed_retention: env_parse("COMPLETED_RETENTION", defaults.completed_retention),
            failed_retention: env_parse("FAILED_RETENTION", defaults.failed_retention),
            stall_reap_interval_secs: env_parse(
                "STALL_REAP_INTERVAL_SECS",
                defaults.stall_reap_interval_secs,
            ),
            stall_grace_period_secs: env_parse(
                "STALL_GRACE_PERIOD_SECS",
                defaults.stall_grace_period_secs,
            ),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            quick_max_width: env_parse("QUICK_MAX_WIDTH", defaults.quick_max_width),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.job_max_attempts == 0 {
            return Err(anyhow::anyhow!("JOB_MAX_ATTEMPTS must be at least 1"));
        }
        if self.queue_max_workers == 0 {
            return Err(anyhow::anyhow!("QUEUE_MAX_WORKERS must be at least 1"));
        }
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET is required for the s3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH is required for the local storage backend"
                    ));
                }
            }
        }
        Ok(())
    }
}
