//! Typed async handles over the queue and tracker actors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use preview_core::{
    CleanupReport, EnqueueRequest, GlobalStats, Job, JobId, JobStatus, QueueStats, StatusUpdate,
    TransitionRecord,
};
use ractor::rpc::CallResult;
use ractor::{ActorRef, Message, RpcReplyPort};

use crate::messages::{ActorError, QueueMessage, TrackerMessage};

/// How long a handle waits for an actor to reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn call<M, T, F>(
    actor: &ActorRef<M>,
    timeout: Duration,
    build: F,
) -> Result<T, ActorError>
where
    M: Message,
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> M,
{
    match ractor::rpc::call(actor, build, Some(timeout)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(ActorError::Timeout),
        Ok(CallResult::SenderError) => Err(ActorError::Actor("reply channel dropped".into())),
        Err(e) => Err(ActorError::Actor(format!("{e}"))),
    }
}

/// Handle to the queue actor.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    actor: ActorRef<QueueMessage>,
    timeout: Duration,
}

impl QueueHandle {
    pub fn new(actor: ActorRef<QueueMessage>) -> Self {
        Self {
            actor,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn actor(&self) -> &ActorRef<QueueMessage> {
        &self.actor
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Job, ActorError> {
        let request = Box::new(request);
        Ok(call(&self.actor, self.timeout, |reply| {
            QueueMessage::Enqueue { request, reply }
        })
        .await??)
    }

    pub async fn process_next(&self) -> Result<Option<Job>, ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::ProcessNext { reply }).await
    }

    pub async fn update_status(
        &self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<Job, ActorError> {
        Ok(call(&self.actor, self.timeout, |reply| QueueMessage::UpdateStatus {
            job_id,
            update,
            reply,
        })
        .await??)
    }

    pub async fn update_progress(&self, job_id: JobId, progress: u8) -> Result<Job, ActorError> {
        Ok(call(&self.actor, self.timeout, |reply| QueueMessage::UpdateProgress {
            job_id,
            progress,
            reply,
        })
        .await??)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::GetJob { job_id, reply }).await
    }

    pub async fn get_queued(&self) -> Result<Vec<Job>, ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::GetQueued { reply }).await
    }

    /// Fail a still-queued job as cancelled. `None` if it was not queued.
    pub async fn cancel_queued(&self, job_id: JobId) -> Result<Option<Job>, ActorError> {
        call(&self.actor, self.timeout, |reply| {
            QueueMessage::CancelQueued { job_id, reply }
        })
        .await
    }

    pub async fn get_processing(&self) -> Result<Vec<Job>, ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::GetProcessing { reply }).await
    }

    pub async fn get_request_jobs(
        &self,
        request_id: impl Into<String>,
    ) -> Result<Vec<Job>, ActorError> {
        let request_id = request_id.into();
        call(&self.actor, self.timeout, |reply| QueueMessage::GetRequestJobs {
            request_id,
            reply,
        })
        .await
    }

    pub async fn get_stats(&self) -> Result<QueueStats, ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::GetStats { reply }).await
    }

    pub async fn clear(&self) -> Result<(), ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::Clear { reply }).await
    }

    pub async fn clean_old_jobs(&self, max_age_secs: u64) -> Result<usize, ActorError> {
        call(&self.actor, self.timeout, |reply| QueueMessage::CleanOldJobs {
            max_age_secs,
            reply,
        })
        .await
    }
}

/// Handle to the tracker actor.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    actor: ActorRef<TrackerMessage>,
    timeout: Duration,
}

impl TrackerHandle {
    pub fn new(actor: ActorRef<TrackerMessage>) -> Self {
        Self {
            actor,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn actor(&self) -> &ActorRef<TrackerMessage> {
        &self.actor
    }

    /// Returns false when a live mapping for `key` already exists.
    pub async fn set_idempotency_key(
        &self,
        key: impl Into<String>,
        job_id: JobId,
    ) -> Result<bool, ActorError> {
        self.store_idempotency_key(key.into(), job_id, None).await
    }

    pub async fn set_idempotency_key_with_ttl(
        &self,
        key: impl Into<String>,
        job_id: JobId,
        ttl_secs: u64,
    ) -> Result<bool, ActorError> {
        self.store_idempotency_key(key.into(), job_id, Some(ttl_secs))
            .await
    }

    async fn store_idempotency_key(
        &self,
        key: String,
        job_id: JobId,
        ttl_secs: Option<u64>,
    ) -> Result<bool, ActorError> {
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::SetIdempotencyKey {
                key,
                job_id,
                ttl_secs,
                reply,
            }
        })
        .await
    }

    pub async fn get_job_by_idempotency_key(
        &self,
        key: impl Into<String>,
    ) -> Result<Option<JobId>, ActorError> {
        let key = key.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetJobByIdempotencyKey { key, reply }
        })
        .await
    }

    pub async fn has_idempotency_key(&self, key: impl Into<String>) -> Result<bool, ActorError> {
        let key = key.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::HasIdempotencyKey { key, reply }
        })
        .await
    }

    /// Drop `key` if it still maps to `job_id`. Returns whether it was removed.
    pub async fn remove_idempotency_key(
        &self,
        key: impl Into<String>,
        job_id: JobId,
    ) -> Result<bool, ActorError> {
        let key = key.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::RemoveIdempotencyKey { key, job_id, reply }
        })
        .await
    }

    pub async fn add_job_to_request(
        &self,
        request_id: impl Into<String>,
        job_id: JobId,
    ) -> Result<(), ActorError> {
        let request_id = request_id.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::AddJobToRequest {
                request_id,
                job_id,
                reply,
            }
        })
        .await
    }

    pub async fn get_jobs_by_request_id(
        &self,
        request_id: impl Into<String>,
    ) -> Result<Vec<JobId>, ActorError> {
        let request_id = request_id.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetJobsByRequestId { request_id, reply }
        })
        .await
    }

    pub async fn get_request_job_count(
        &self,
        request_id: impl Into<String>,
    ) -> Result<usize, ActorError> {
        let request_id = request_id.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetRequestJobCount { request_id, reply }
        })
        .await
    }

    pub async fn clean_old_requests(&self, max_age_secs: u64) -> Result<usize, ActorError> {
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::CleanOldRequests {
                max_age_secs,
                reply,
            }
        })
        .await
    }

    pub async fn record_transition(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<(), ActorError> {
        self.record_transition_with_metadata(job_id, from, to, None)
            .await
    }

    pub async fn record_transition_with_metadata(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ActorError> {
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::RecordTransition {
                job_id,
                from,
                to,
                metadata,
                reply,
            }
        })
        .await
    }

    pub async fn get_job_history(
        &self,
        job_id: JobId,
    ) -> Result<Vec<TransitionRecord>, ActorError> {
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetJobHistory { job_id, reply }
        })
        .await
    }

    pub async fn get_global_stats(&self) -> Result<GlobalStats, ActorError> {
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetGlobalStats { reply }
        })
        .await
    }

    pub async fn record_request(&self, client_id: impl Into<String>) -> Result<(), ActorError> {
        let client_id = client_id.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::RecordRequest { client_id, reply }
        })
        .await
    }

    pub async fn get_request_count(
        &self,
        client_id: impl Into<String>,
        window_secs: u64,
    ) -> Result<usize, ActorError> {
        let client_id = client_id.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetRequestCount {
                client_id,
                window_secs,
                reply,
            }
        })
        .await
    }

    pub async fn get_next_available_slot(
        &self,
        client_id: impl Into<String>,
        max_requests: usize,
        window_secs: u64,
    ) -> Result<DateTime<Utc>, ActorError> {
        let client_id = client_id.into();
        call(&self.actor, self.timeout, |reply| {
            TrackerMessage::GetNextAvailableSlot {
                client_id,
                max_requests,
                window_secs,
                reply,
            }
        })
        .await
    }

    pub async fn run_cleanup(&self) -> Result<CleanupReport, ActorError> {
        call(&self.actor, self.timeout, |reply| TrackerMessage::RunCleanup {
            reply,
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), ActorError> {
        call(&self.actor, self.timeout, |reply| TrackerMessage::Clear { reply }).await
    }
}
