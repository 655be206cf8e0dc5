//! Error types for admission, transitions, and execution.

use chrono::{DateTime, Utc};

use crate::job::{ErrorCode, JobError, JobId, JobStatus};

/// Retry hint when the queue is at capacity.
pub const QUEUE_FULL_RETRY_SECS: u64 = 60;
/// Retry hint when a request has used its job quota.
pub const REQUEST_QUOTA_RETRY_SECS: u64 = 30;

/// A job was refused at admission. Queue state is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("job queue is full ({current}/{limit})")]
    QueueFull { current: usize, limit: usize },

    #[error("request {request_id} already has {current} jobs (limit {limit})")]
    RequestQuotaExceeded {
        request_id: String,
        current: usize,
        limit: usize,
    },

    #[error("rate limit exceeded ({current}/{limit} jobs per minute), next slot at {retry_at}")]
    RateLimited {
        current: usize,
        limit: usize,
        retry_at: DateTime<Utc>,
    },
}

impl AdmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AdmissionError::QueueFull { .. } => ErrorCode::QueueFull,
            AdmissionError::RequestQuotaExceeded { .. } | AdmissionError::RateLimited { .. } => {
                ErrorCode::RateLimited
            }
        }
    }

    /// Seconds a caller should wait before retrying, rounded up.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        match self {
            AdmissionError::QueueFull { .. } => QUEUE_FULL_RETRY_SECS,
            AdmissionError::RequestQuotaExceeded { .. } => REQUEST_QUOTA_RETRY_SECS,
            AdmissionError::RateLimited { retry_at, .. } => {
                let millis = (*retry_at - now).num_milliseconds().max(0);
                u64::try_from(millis).unwrap_or(0).div_ceil(1000)
            }
        }
    }

    /// Current count and configured limit of the check that failed.
    pub fn usage(&self) -> (usize, usize) {
        match self {
            AdmissionError::QueueFull { current, limit }
            | AdmissionError::RequestQuotaExceeded { current, limit, .. }
            | AdmissionError::RateLimited { current, limit, .. } => (*current, *limit),
        }
    }
}

/// A status change was refused. Indicates a caller bug; never retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} is {status}, progress can only change while processing")]
    NotProcessing { job_id: JobId, status: JobStatus },
}

/// Failure reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ExecutionError {
    /// Network or timeout class failures that may succeed on retry.
    pub transient: bool,
    pub code: ErrorCode,
    pub message: String,
}

impl ExecutionError {
    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            transient: true,
            code,
            message: message.into(),
        }
    }

    pub fn permanent(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            transient: false,
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::permanent(ErrorCode::Cancelled, "job was cancelled")
    }

    pub fn timed_out(after_secs: u64) -> Self {
        Self::transient(
            ErrorCode::ProviderTimeout,
            format!("execution timed out after {after_secs}s"),
        )
    }

    /// Convert into the error recorded on a failed job.
    pub fn into_job_error(self) -> JobError {
        let error = JobError::new(self.code, self.message);
        match self.code {
            ErrorCode::InvalidPayload => error.with_fix("correct the job payload and resubmit"),
            ErrorCode::ProviderQuotaExceeded => error.with_retry_after(3600),
            _ => error,
        }
    }
}
