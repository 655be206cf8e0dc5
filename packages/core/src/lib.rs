//! Core domain for the preview job system.
//!
//! This crate is synchronous and runtime-agnostic:
//! - `Job`, `JobStatus`, and typed payloads
//! - `JobQueue`: admission control, priority selection, lifecycle transitions
//! - `JobTracker`: idempotency keys, request correlation, history, client rate windows
//! - `Clock`: the single source of "now" for every TTL and window
//! - Configuration and retry policy shared with the actor layer

mod clock;
mod config;
mod error;
mod job;
mod payload;
mod queue;
mod retry;
mod tracker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, add_secs, secs_to_delta};
pub use config::{
    ConfigError, HousekeepingConfig, QueueConfig, RateLimitConfig, SystemConfig, TrackerConfig,
    WorkerConfig,
};
pub use error::{
    AdmissionError, ExecutionError, QUEUE_FULL_RETRY_SECS, REQUEST_QUOTA_RETRY_SECS,
    TransitionError,
};
pub use job::{EnqueueRequest, ErrorCode, Job, JobError, JobId, JobResult, JobStatus, Priority};
pub use payload::{
    AspectRatio, CompilePayload, ExportFormat, ExportPayload, JobKind, JobPayload, PayloadError,
    PREVIEW_DURATION_SECS, PreviewPayload, Quality,
};
pub use queue::{ADMISSION_WINDOW, JobQueue, QueueStats, StatusUpdate};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use tracker::{CleanupReport, GlobalStats, JobTracker, TransitionRecord};
