//! Tracker actor owning the single `JobTracker`.

use preview_core::JobTracker;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::TrackerMessage;

/// Tracker actor that serializes access to idempotency keys, request
/// correlation, transition history and client rate windows.
pub struct TrackerActor;

impl Actor for TrackerActor {
    type Msg = TrackerMessage;
    type State = JobTracker;
    type Arguments = JobTracker;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting tracker actor: idempotency_ttl={}s",
            args.config().idempotency_ttl_secs
        );
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        tracker: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TrackerMessage::SetIdempotencyKey {
                key,
                job_id,
                ttl_secs,
                reply,
            } => {
                let stored = match ttl_secs {
                    Some(ttl) => tracker.set_idempotency_key_with_ttl(key, job_id, ttl),
                    None => tracker.set_idempotency_key(key, job_id),
                };
                let _ = reply.send(stored);
            }

            TrackerMessage::GetJobByIdempotencyKey { key, reply } => {
                let _ = reply.send(tracker.get_job_by_idempotency_key(&key));
            }

            TrackerMessage::HasIdempotencyKey { key, reply } => {
                let _ = reply.send(tracker.has_idempotency_key(&key));
            }

            TrackerMessage::RemoveIdempotencyKey { key, job_id, reply } => {
                let _ = reply.send(tracker.remove_idempotency_key(&key, job_id));
            }

            TrackerMessage::AddJobToRequest {
                request_id,
                job_id,
                reply,
            } => {
                tracker.add_job_to_request(request_id, job_id);
                let _ = reply.send(());
            }

            TrackerMessage::GetJobsByRequestId { request_id, reply } => {
                let _ = reply.send(tracker.get_jobs_by_request_id(&request_id));
            }

            TrackerMessage::GetRequestJobCount { request_id, reply } => {
                let _ = reply.send(tracker.get_request_job_count(&request_id));
            }

            TrackerMessage::CleanOldRequests {
                max_age_secs,
                reply,
            } => {
                let _ = reply.send(tracker.clean_old_requests(max_age_secs));
            }

            TrackerMessage::RecordTransition {
                job_id,
                from,
                to,
                metadata,
                reply,
            } => {
                tracker.record_transition_with_metadata(job_id, from, to, metadata);
                let _ = reply.send(());
            }

            TrackerMessage::GetJobHistory { job_id, reply } => {
                let _ = reply.send(tracker.get_job_history(job_id));
            }

            TrackerMessage::GetGlobalStats { reply } => {
                let _ = reply.send(tracker.get_global_stats());
            }

            TrackerMessage::RecordRequest { client_id, reply } => {
                tracker.record_request(client_id);
                let _ = reply.send(());
            }

            TrackerMessage::GetRequestCount {
                client_id,
                window_secs,
                reply,
            } => {
                let _ = reply.send(tracker.get_request_count(&client_id, window_secs));
            }

            TrackerMessage::GetNextAvailableSlot {
                client_id,
                max_requests,
                window_secs,
                reply,
            } => {
                let _ = reply.send(tracker.get_next_available_slot(
                    &client_id,
                    max_requests,
                    window_secs,
                ));
            }

            TrackerMessage::RunCleanup { reply } => {
                let _ = reply.send(tracker.run_cleanup());
            }

            TrackerMessage::Clear { reply } => {
                tracker.clear();
                let _ = reply.send(());
            }

            TrackerMessage::Tick => {
                tracker.run_cleanup();
            }

            TrackerMessage::Shutdown => {
                tracing::info!("Shutting down tracker actor");
                myself.stop(None);
            }
        }

        Ok(())
    }
}
