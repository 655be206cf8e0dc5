//! Actor system for the preview job core.
//!
//! The synchronous `JobQueue` and `JobTracker` from `preview_core` are each
//! owned by one ractor actor, which makes every operation atomic. Workers
//! claim jobs through the queue actor and run them on an injected
//! [`Executor`].
//!
//! # Architecture
//!
//! - `QueueActor` - Admission, selection and lifecycle transitions
//! - `TrackerActor` - Idempotency keys, request ledger, history, rate windows
//! - `WorkerActor` - Claims and executes jobs, writes outcomes back
//! - `JobSystem` - Composition root that starts and stops all of the above
//!
//! # Usage
//!
//! ```ignore
//! use preview_actors::{JobSystem, executor_fn};
//! use preview_core::{EnqueueRequest, JobResult, PreviewPayload, SystemConfig};
//!
//! let executor = executor_fn!(|job| Ok(JobResult::video(format!("/previews/{}.mp4", job.id))));
//! let system = JobSystem::start(SystemConfig::default(), executor).await?;
//!
//! let submission = system
//!     .submit(EnqueueRequest::new(PreviewPayload::new("veo-1", "a red fox")))
//!     .await?;
//! let job = system.queue().get_job(submission.job.id).await?;
//!
//! system.shutdown().await;
//! ```

mod executor;
mod handle;
mod messages;
mod queue_actor;
mod system;
mod tracker_actor;
mod worker_actor;

pub use executor::{
    ExecutionFuture, ExecutionResult, Executor, ExecutorRegistry, FnExecutor, ProgressReporter,
};
pub use handle::{DEFAULT_CALL_TIMEOUT, QueueHandle, TrackerHandle};
pub use messages::{ActorError, QueueMessage, TrackerMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueActorState};
pub use system::{JobSystem, Submission};
pub use tracker_actor::TrackerActor;
pub use worker_actor::{WorkerActor, WorkerActorState, WorkerArgs};

/// Re-export for macros and downstream convenience.
pub use preview_core;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
