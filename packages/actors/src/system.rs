//! Composition root wiring the queue, tracker and workers together.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use preview_core::{
    EnqueueRequest, Job, JobId, JobQueue, JobStatus, JobTracker, SharedClock, SystemClock,
    SystemConfig,
};
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorRef};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::executor::Executor;
use crate::handle::{QueueHandle, TrackerHandle, call};
use crate::messages::{ActorError, QueueMessage, TrackerMessage, WorkerMessage};
use crate::queue_actor::{QueueActor, QueueActorState};
use crate::tracker_actor::TrackerActor;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Outcome of [`JobSystem::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    /// The idempotency key already pointed at a live job, which is returned
    /// instead of admitting a new one.
    pub duplicate: bool,
}

/// A running job system: one queue actor, one tracker actor, a pool of
/// workers and an optional housekeeping task.
///
/// Built explicitly by the caller; nothing here is process-global.
pub struct JobSystem {
    queue: QueueHandle,
    tracker: TrackerHandle,
    workers: Vec<ActorRef<WorkerMessage>>,
    worker_handles: Vec<JoinHandle<()>>,
    actor_handles: Vec<JoinHandle<()>>,
    housekeeping: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
    clock: SharedClock,
    submit_lock: Mutex<()>,
}

impl JobSystem {
    /// Start a job system on the wall clock.
    pub async fn start<E: Executor>(config: SystemConfig, executor: E) -> Result<Self, ActorError> {
        Self::start_with_clock(config, executor, Arc::new(SystemClock)).await
    }

    /// Start a job system whose queue and tracker read time from `clock`.
    pub async fn start_with_clock<E: Executor>(
        config: SystemConfig,
        executor: E,
        clock: SharedClock,
    ) -> Result<Self, ActorError> {
        tracing::info!("Starting job system with {} workers", config.worker.workers);
        let cancel = CancellationToken::new();

        let queue = JobQueue::with_clock(config.queue.clone(), clock.clone());
        let (queue_ref, queue_handle) = Actor::spawn(
            None,
            QueueActor,
            QueueActorState::new(queue, config.housekeeping.job_retention_secs),
        )
        .await
        .map_err(|e| ActorError::Spawn(format!("queue: {}", e)))?;

        let tracker = JobTracker::with_clock(config.tracker.clone(), clock.clone());
        let (tracker_ref, tracker_handle) = match Actor::spawn(None, TrackerActor, tracker).await {
            Ok(spawned) => spawned,
            Err(e) => {
                queue_ref.stop(None);
                return Err(ActorError::Spawn(format!("tracker: {}", e)));
            }
        };

        let mut system = Self {
            queue: QueueHandle::new(queue_ref),
            tracker: TrackerHandle::new(tracker_ref),
            workers: Vec::with_capacity(config.worker.workers),
            worker_handles: Vec::with_capacity(config.worker.workers),
            actor_handles: vec![queue_handle, tracker_handle],
            housekeeping: None,
            cancel,
            clock,
            submit_lock: Mutex::new(()),
        };

        let executor: Arc<dyn Executor> = Arc::new(executor);
        for index in 0..config.worker.workers {
            let args = WorkerArgs {
                worker_id: format!("worker-{}", index),
                queue: system.queue.clone(),
                tracker: system.tracker.clone(),
                executor: executor.clone(),
                config: config.worker.clone(),
                cancel: system.cancel.clone(),
            };
            match Actor::spawn(None, WorkerActor, args).await {
                Ok((worker, handle)) => {
                    system.workers.push(worker);
                    system.worker_handles.push(handle);
                }
                Err(e) => {
                    system.shutdown().await;
                    return Err(ActorError::Spawn(format!("worker-{}: {}", index, e)));
                }
            }
        }

        if config.housekeeping.interval_secs > 0 {
            system.housekeeping = Some(spawn_housekeeping(
                Duration::from_secs(config.housekeeping.interval_secs),
                system.queue.actor().clone(),
                system.tracker.actor().clone(),
                system.cancel.clone(),
            ));
        }

        Ok(system)
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn tracker(&self) -> &TrackerHandle {
        &self.tracker
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Admit a job the way an upstream handler does.
    ///
    /// A live idempotency key returns the job it already points at. Otherwise
    /// the job is enqueued, its key and request id are registered with the
    /// tracker, and idle workers are woken. Keyed submits run one at a time,
    /// so two submits with the same key admit exactly one job.
    pub async fn submit(&self, request: EnqueueRequest) -> Result<Submission, ActorError> {
        let _guard = match &request.idempotency_key {
            Some(_) => Some(self.submit_lock.lock().await),
            None => None,
        };

        if let Some(key) = &request.idempotency_key
            && let Some(job) = self.job_for_key(key).await?
        {
            tracing::debug!("Idempotency key {} maps to job {}", key, job.id);
            return Ok(Submission {
                job,
                duplicate: true,
            });
        }

        let job = self.queue.enqueue(request).await?;
        if let Some(key) = &job.idempotency_key
            && !self.tracker.set_idempotency_key(key.as_str(), job.id).await?
        {
            // Registered directly on the tracker since the lookup above.
            match self.job_for_key(key).await? {
                Some(existing) => {
                    tracing::warn!(
                        "Idempotency key {} was claimed by job {}; discarding job {}",
                        key,
                        existing.id,
                        job.id
                    );
                    self.cancel_job(job.id).await?;
                    return Ok(Submission {
                        job: existing,
                        duplicate: true,
                    });
                }
                None => {
                    self.tracker.set_idempotency_key(key.as_str(), job.id).await?;
                }
            }
        }
        if let Some(request_id) = &job.request_id {
            self.tracker
                .add_job_to_request(request_id.as_str(), job.id)
                .await?;
        }

        self.wake_workers();
        Ok(Submission {
            job,
            duplicate: false,
        })
    }

    /// The job an idempotency key points at. A key whose job has been
    /// cleaned from the queue is dropped and reported as unmapped.
    async fn job_for_key(&self, key: &str) -> Result<Option<Job>, ActorError> {
        let Some(job_id) = self.tracker.get_job_by_idempotency_key(key).await? else {
            return Ok(None);
        };
        match self.queue.get_job(job_id).await? {
            Some(job) => Ok(Some(job)),
            None => {
                tracing::debug!("Dropping idempotency key {} of cleaned job {}", key, job_id);
                self.tracker.remove_idempotency_key(key, job_id).await?;
                Ok(None)
            }
        }
    }

    /// Nudge every worker to poll now instead of on its next tick.
    pub fn wake_workers(&self) {
        for worker in &self.workers {
            let _ = worker.send_message(WorkerMessage::Poll);
        }
    }

    /// Cancel a job. A queued job fails immediately; a processing job is
    /// interrupted and settles as failed. Returns false when the job is
    /// unknown or already finished.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<bool, ActorError> {
        if self.queue.cancel_queued(job_id).await?.is_some() {
            self.tracker
                .record_transition(job_id, JobStatus::Queued, JobStatus::Failed)
                .await?;
            return Ok(true);
        }

        for worker in &self.workers {
            let cancelled = call(worker, crate::handle::DEFAULT_CALL_TIMEOUT, |reply| {
                WorkerMessage::CancelJob { job_id, reply }
            })
            .await?;
            if cancelled {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether every worker is between jobs.
    pub async fn is_idle(&self) -> Result<bool, ActorError> {
        for worker in &self.workers {
            let idle = call(worker, crate::handle::DEFAULT_CALL_TIMEOUT, |reply| {
                WorkerMessage::IsIdle { reply }
            })
            .await?;
            if !idle {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stop the system. In-flight jobs are cancelled and settle as failed
    /// before their workers stop; the queue and tracker stop last.
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down job system");
        self.cancel.cancel();

        if let Some(housekeeping) = self.housekeeping.take() {
            let _ = housekeeping.await;
        }

        for worker in &self.workers {
            let _ = worker.send_message(WorkerMessage::Shutdown);
        }
        join_all(self.worker_handles.drain(..)).await;

        let _ = self.queue.actor().send_message(QueueMessage::Shutdown);
        let _ = self.tracker.actor().send_message(TrackerMessage::Shutdown);
        join_all(self.actor_handles.drain(..)).await;
    }
}

fn spawn_housekeeping(
    period: Duration,
    queue: ActorRef<QueueMessage>,
    tracker: ActorRef<TrackerMessage>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; there is nothing to sweep yet.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if queue.send_message(QueueMessage::Tick).is_err()
                        || tracker.send_message(TrackerMessage::Tick).is_err()
                    {
                        break;
                    }
                }
            }
        }
    })
}
