//! Message types for actor communication.

use chrono::{DateTime, Utc};
use preview_core::{
    AdmissionError, CleanupReport, EnqueueRequest, ExecutionError, GlobalStats, Job, JobId,
    JobResult, JobStatus, QueueStats, StatusUpdate, TransitionError, TransitionRecord,
};
use ractor::RpcReplyPort;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Admit a new job.
    Enqueue {
        request: Box<EnqueueRequest>,
        reply: RpcReplyPort<Result<Job, AdmissionError>>,
    },

    /// Claim the next job for a worker.
    ProcessNext { reply: RpcReplyPort<Option<Job>> },

    /// Apply a lifecycle transition.
    UpdateStatus {
        job_id: JobId,
        update: StatusUpdate,
        reply: RpcReplyPort<Result<Job, TransitionError>>,
    },

    /// Report progress of a processing job.
    UpdateProgress {
        job_id: JobId,
        progress: u8,
        reply: RpcReplyPort<Result<Job, TransitionError>>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Queued jobs in selection order.
    GetQueued { reply: RpcReplyPort<Vec<Job>> },

    /// Fail a job that is still queued with `CANCELLED`. Replies with the
    /// updated job, or `None` when the job is not queued.
    CancelQueued {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Jobs currently processing.
    GetProcessing { reply: RpcReplyPort<Vec<Job>> },

    /// Jobs admitted under a request id.
    GetRequestJobs {
        request_id: String,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Drop every job and counter.
    Clear { reply: RpcReplyPort<()> },

    /// Remove finished jobs older than the given age.
    CleanOldJobs {
        max_age_secs: u64,
        reply: RpcReplyPort<usize>,
    },

    /// Periodic tick for housekeeping.
    Tick,

    /// Stop the actor.
    Shutdown,
}

/// Messages for the TrackerActor.
#[derive(Debug)]
pub enum TrackerMessage {
    SetIdempotencyKey {
        key: String,
        job_id: JobId,
        /// Falls back to the configured TTL.
        ttl_secs: Option<u64>,
        reply: RpcReplyPort<bool>,
    },
    GetJobByIdempotencyKey {
        key: String,
        reply: RpcReplyPort<Option<JobId>>,
    },
    HasIdempotencyKey {
        key: String,
        reply: RpcReplyPort<bool>,
    },
    /// Drop `key` only if it still maps to `job_id`.
    RemoveIdempotencyKey {
        key: String,
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },
    AddJobToRequest {
        request_id: String,
        job_id: JobId,
        reply: RpcReplyPort<()>,
    },
    GetJobsByRequestId {
        request_id: String,
        reply: RpcReplyPort<Vec<JobId>>,
    },
    GetRequestJobCount {
        request_id: String,
        reply: RpcReplyPort<usize>,
    },
    CleanOldRequests {
        max_age_secs: u64,
        reply: RpcReplyPort<usize>,
    },
    RecordTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        metadata: Option<serde_json::Value>,
        reply: RpcReplyPort<()>,
    },
    GetJobHistory {
        job_id: JobId,
        reply: RpcReplyPort<Vec<TransitionRecord>>,
    },
    GetGlobalStats {
        reply: RpcReplyPort<GlobalStats>,
    },
    RecordRequest {
        client_id: String,
        reply: RpcReplyPort<()>,
    },
    GetRequestCount {
        client_id: String,
        window_secs: u64,
        reply: RpcReplyPort<usize>,
    },
    GetNextAvailableSlot {
        client_id: String,
        max_requests: usize,
        window_secs: u64,
        reply: RpcReplyPort<DateTime<Utc>>,
    },
    RunCleanup {
        reply: RpcReplyPort<CleanupReport>,
    },
    Clear {
        reply: RpcReplyPort<()>,
    },

    /// Periodic tick for housekeeping.
    Tick,

    /// Stop the actor.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim a job if idle. Sent by the poll timer and as a wake signal.
    Poll,

    /// The execution task for the current job finished.
    Finished {
        job: Box<Job>,
        outcome: Result<JobResult, ExecutionError>,
    },

    /// Cancel the current job if it matches.
    CancelJob {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// Check if worker is idle.
    IsIdle { reply: RpcReplyPort<bool> },

    /// Stop once the current job has settled.
    Shutdown,
}

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Actor error: {0}")]
    Actor(String),

    #[error("Failed to spawn actor: {0}")]
    Spawn(String),

    #[error("Timeout")]
    Timeout,
}
