//! Configuration for the queue, tracker, and workers.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::job::Priority;
use crate::retry::RetryPolicy;

/// Admission rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admissions allowed in any trailing 60 second window.
    pub per_minute: usize,
    /// Jobs allowed per request id.
    pub per_request: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_request: 2,
        }
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of jobs processing at once.
    pub max_concurrent: usize,
    /// Maximum number of jobs held by the queue, terminal ones included.
    pub max_queue_size: usize,
    /// Priority for requests that do not specify one.
    pub default_priority: Priority,
    pub rate_limit: RateLimitConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 1000,
            default_priority: Priority::Normal,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: usize, per_request: usize) -> Self {
        self.rate_limit = RateLimitConfig {
            per_minute,
            per_request,
        };
        self
    }
}

/// Retention and window settings for the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// TTL applied when a caller does not pass one.
    pub idempotency_ttl_secs: u64,
    /// Request associations idle for longer than this are swept.
    pub request_retention_secs: u64,
    /// Client rate windows are trimmed to this span on sweep.
    pub rate_window_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: 3600,
            request_retention_secs: 600,
            rate_window_secs: 60,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker actors to spawn.
    pub workers: usize,
    /// How often an idle worker polls the queue.
    pub poll_interval_ms: u64,
    /// Per-attempt execution timeout.
    pub execution_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 1000,
            execution_timeout_secs: 300,
            retry: RetryPolicy::default(),
        }
    }
}

/// Periodic cleanup of terminal jobs and tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    /// Seconds between sweeps; 0 disables them.
    pub interval_secs: u64,
    /// Terminal jobs older than this are dropped from the queue.
    pub job_retention_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            job_retention_secs: 3600,
        }
    }
}

/// Everything needed to start the job system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub queue: QueueConfig,
    pub tracker: TrackerConfig,
    pub worker: WorkerConfig,
    pub housekeeping: HousekeepingConfig,
}

impl SystemConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `QUEUE_MAX_CONCURRENT`, `QUEUE_MAX_SIZE`
    /// - `RATE_LIMIT_PER_MINUTE`, `RATE_LIMIT_PER_REQUEST`
    /// - `IDEMPOTENCY_TTL_SECS`
    /// - `WORKER_COUNT`, `WORKER_POLL_INTERVAL_MS`, `WORKER_MAX_ATTEMPTS`
    /// - `JOB_RETENTION_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`SystemConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let read = |name: &'static str| lookup(name).and_then(non_empty);

        if let Some(v) = read("QUEUE_MAX_CONCURRENT") {
            cfg.queue.max_concurrent = parse("QUEUE_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = read("QUEUE_MAX_SIZE") {
            cfg.queue.max_queue_size = parse("QUEUE_MAX_SIZE", &v)?;
        }
        if let Some(v) = read("RATE_LIMIT_PER_MINUTE") {
            cfg.queue.rate_limit.per_minute = parse("RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = read("RATE_LIMIT_PER_REQUEST") {
            cfg.queue.rate_limit.per_request = parse("RATE_LIMIT_PER_REQUEST", &v)?;
        }
        if let Some(v) = read("IDEMPOTENCY_TTL_SECS") {
            cfg.tracker.idempotency_ttl_secs = parse("IDEMPOTENCY_TTL_SECS", &v)?;
        }
        if let Some(v) = read("WORKER_COUNT") {
            cfg.worker.workers = parse("WORKER_COUNT", &v)?;
        }
        if let Some(v) = read("WORKER_POLL_INTERVAL_MS") {
            cfg.worker.poll_interval_ms = parse("WORKER_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = read("WORKER_MAX_ATTEMPTS") {
            cfg.worker.retry.max_attempts = parse("WORKER_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = read("JOB_RETENTION_SECS") {
            cfg.housekeeping.job_retention_secs = parse("JOB_RETENTION_SECS", &v)?;
        }

        if cfg.worker.workers == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_COUNT",
                reason: "at least one worker is required".to_string(),
            });
        }

        Ok(cfg)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Parse { name: &'static str, value: String },

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Parse {
        name,
        value: value.to_string(),
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
