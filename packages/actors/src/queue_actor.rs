//! Queue actor owning the single `JobQueue`.
//!
//! Every queue operation runs inside one message handler, so admission checks,
//! claims and transitions are atomic with respect to each other.

use preview_core::{ExecutionError, JobQueue, JobStatus, StatusUpdate};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::QueueMessage;

/// State for the queue actor.
pub struct QueueActorState {
    queue: JobQueue,
    /// Age after which finished jobs are dropped on `Tick`. Zero keeps them.
    job_retention_secs: u64,
}

impl QueueActorState {
    pub fn new(queue: JobQueue, job_retention_secs: u64) -> Self {
        Self {
            queue,
            job_retention_secs,
        }
    }
}

/// Queue actor that serializes access to the job queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let config = args.queue.config();
        tracing::info!(
            "Starting queue actor: max_concurrent={}, max_queue_size={}, per_minute={}",
            config.max_concurrent,
            config.max_queue_size,
            config.rate_limit.per_minute
        );
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { request, reply } => {
                let _ = reply.send(state.queue.enqueue(*request));
            }

            QueueMessage::ProcessNext { reply } => {
                let _ = reply.send(state.queue.process_next());
            }

            QueueMessage::UpdateStatus {
                job_id,
                update,
                reply,
            } => {
                let result = state.queue.update_status(job_id, update);
                if let Err(ref e) = result {
                    tracing::warn!("Rejected status update: {}", e);
                }
                let _ = reply.send(result);
            }

            QueueMessage::UpdateProgress {
                job_id,
                progress,
                reply,
            } => {
                let _ = reply.send(state.queue.update_progress(job_id, progress));
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.queue.get_job(job_id));
            }

            QueueMessage::GetQueued { reply } => {
                let _ = reply.send(state.queue.get_queued());
            }

            QueueMessage::CancelQueued { job_id, reply } => {
                let cancelled = match state.queue.get_job(job_id) {
                    Some(job) if job.status == JobStatus::Queued => {
                        let error = ExecutionError::cancelled().into_job_error();
                        state
                            .queue
                            .update_status(job_id, StatusUpdate::Failed(error))
                            .ok()
                    }
                    _ => None,
                };
                let _ = reply.send(cancelled);
            }

            QueueMessage::GetProcessing { reply } => {
                let _ = reply.send(state.queue.get_processing());
            }

            QueueMessage::GetRequestJobs { request_id, reply } => {
                let _ = reply.send(state.queue.get_request_jobs(&request_id));
            }

            QueueMessage::GetStats { reply } => {
                let _ = reply.send(state.queue.get_stats());
            }

            QueueMessage::Clear { reply } => {
                state.queue.clear();
                let _ = reply.send(());
            }

            QueueMessage::CleanOldJobs {
                max_age_secs,
                reply,
            } => {
                let _ = reply.send(state.queue.clean_old_jobs(max_age_secs));
            }

            QueueMessage::Tick => {
                if state.job_retention_secs > 0 {
                    let removed = state.queue.clean_old_jobs(state.job_retention_secs);
                    if removed > 0 {
                        tracing::debug!("Removed {} finished jobs", removed);
                    }
                }
            }

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue actor");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
