//! Worker actor for executing jobs.

use std::sync::Arc;
use std::time::Duration;

use preview_core::{
    ErrorCode, ExecutionError, Job, JobId, JobResult, JobStatus, RetryPolicy, StatusUpdate,
    WorkerConfig,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::executor::{Executor, ProgressReporter};
use crate::handle::{QueueHandle, TrackerHandle};
use crate::messages::WorkerMessage;

/// The job a worker is currently running.
struct RunningJob {
    job_id: JobId,
    cancel: CancellationToken,
}

/// State for the worker actor.
pub struct WorkerActorState {
    worker_id: String,
    queue: QueueHandle,
    tracker: TrackerHandle,
    executor: Arc<dyn Executor>,
    retry: RetryPolicy,
    execution_timeout: Duration,
    /// Parent of every job token; cancelling it stops the worker.
    cancel: CancellationToken,
    current: Option<RunningJob>,
    stopping: bool,
}

impl WorkerActorState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: QueueHandle,
    pub tracker: TrackerHandle,
    pub executor: Arc<dyn Executor>,
    pub config: WorkerConfig,
    pub cancel: CancellationToken,
}

/// Worker actor that claims jobs from the queue and runs them.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        // Poll loop
        let myself_clone = myself.clone();
        let cancel = args.cancel.clone();
        let poll_interval = Duration::from_millis(args.config.poll_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = myself_clone.send_message(WorkerMessage::Shutdown);
                        break;
                    }
                    _ = interval.tick() => {
                        if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue: args.queue,
            tracker: args.tracker,
            executor: args.executor,
            retry: args.config.retry,
            execution_timeout: Duration::from_secs(args.config.execution_timeout_secs),
            cancel: args.cancel,
            current: None,
            stopping: false,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.stopping || state.cancel.is_cancelled() || !state.is_idle() {
                    return Ok(());
                }
                claim_next(&myself, state).await;
            }

            WorkerMessage::Finished { job, outcome } => {
                settle(state, &job, outcome).await;
                state.current = None;

                if state.stopping {
                    tracing::info!("Shutting down worker: {}", state.worker_id);
                    myself.stop(None);
                } else {
                    // More work may be waiting; don't wait for the next tick.
                    myself.send_message(WorkerMessage::Poll)?;
                }
            }

            WorkerMessage::CancelJob { job_id, reply } => {
                let cancelled = match &state.current {
                    Some(running) if running.job_id == job_id => {
                        tracing::info!("Worker {} cancelling job {}", state.worker_id, job_id);
                        running.cancel.cancel();
                        true
                    }
                    _ => false,
                };
                let _ = reply.send(cancelled);
            }

            WorkerMessage::IsIdle { reply } => {
                let _ = reply.send(state.is_idle());
            }

            WorkerMessage::Shutdown => {
                state.stopping = true;
                match &state.current {
                    // The job settles as cancelled, then `Finished` stops us.
                    Some(running) => running.cancel.cancel(),
                    None => {
                        tracing::info!("Shutting down worker: {}", state.worker_id);
                        myself.stop(None);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Claim the next job and start running it in the background.
async fn claim_next(myself: &ActorRef<WorkerMessage>, state: &mut WorkerActorState) {
    let job = match state.queue.process_next().await {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Worker {} failed to claim a job: {}", state.worker_id, e);
            return;
        }
    };

    tracing::debug!("Worker {} picked up job {}", state.worker_id, job.id);
    if let Err(e) = state
        .tracker
        .record_transition(job.id, JobStatus::Queued, JobStatus::Processing)
        .await
    {
        tracing::warn!("Failed to record start of job {}: {}", job.id, e);
    }

    let cancel = state.cancel.child_token();
    state.current = Some(RunningJob {
        job_id: job.id,
        cancel: cancel.clone(),
    });

    let executor = state.executor.clone();
    let progress = ProgressReporter::new(job.id, state.queue.clone());
    let retry = state.retry.clone();
    let timeout = state.execution_timeout;
    let myself = myself.clone();
    tokio::spawn(async move {
        let outcome = run_job(executor.as_ref(), &job, &progress, &retry, timeout, &cancel).await;
        let job_id = job.id;
        if myself
            .send_message(WorkerMessage::Finished {
                job: Box::new(job),
                outcome,
            })
            .is_err()
        {
            tracing::warn!("Worker stopped before job {} settled", job_id);
        }
    });
}

/// Run one job to an outcome: validate, then execute with retries.
///
/// Every attempt races the job's cancellation token and the per-attempt
/// timeout; backoff sleeps are cancellable too.
pub(crate) async fn run_job(
    executor: &dyn Executor,
    job: &Job,
    progress: &ProgressReporter,
    retry: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<JobResult, ExecutionError> {
    if let Err(e) = job.payload.validate() {
        return Err(ExecutionError::permanent(
            ErrorCode::InvalidPayload,
            e.to_string(),
        ));
    }

    let mut attempt: u32 = 1;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecutionError::cancelled()),
            result = tokio::time::timeout(timeout, executor.execute(job, progress.clone())) => {
                result.unwrap_or_else(|_| Err(ExecutionError::timed_out(timeout.as_secs())))
            }
        };

        match outcome {
            Ok(result) => return Ok(result),
            Err(error) if error.transient && retry.should_retry(attempt) => {
                let delay = retry.backoff_delay(attempt);
                tracing::warn!(
                    "Job {} attempt {} failed: {}; retrying in {:?}",
                    job.id,
                    attempt,
                    error,
                    delay
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ExecutionError::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Write the outcome through the queue, then mirror it into the tracker.
async fn settle(
    state: &WorkerActorState,
    job: &Job,
    outcome: Result<JobResult, ExecutionError>,
) {
    let (update, metadata) = match outcome {
        Ok(result) => {
            tracing::info!("Job {} completed", job.id);
            (StatusUpdate::Completed(result), None)
        }
        Err(error) => {
            tracing::warn!("Job {} failed: {}", job.id, error);
            let error = error.into_job_error();
            let metadata = serde_json::to_value(&error)
                .ok()
                .map(|error| serde_json::json!({ "error": error }));
            (StatusUpdate::Failed(error), metadata)
        }
    };
    let to = update.status();

    if let Err(e) = state.queue.update_status(job.id, update).await {
        tracing::warn!("Failed to settle job {}: {}", job.id, e);
        return;
    }

    if let Err(e) = state
        .tracker
        .record_transition_with_metadata(job.id, JobStatus::Processing, to, metadata)
        .await
    {
        tracing::warn!("Failed to record transition for job {}: {}", job.id, e);
    }
}
