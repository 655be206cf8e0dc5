//! In-memory priority job queue with admission control.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, SystemClock, secs_to_delta};
use crate::config::QueueConfig;
use crate::error::{AdmissionError, TransitionError};
use crate::job::{EnqueueRequest, Job, JobError, JobId, JobResult, JobStatus};

/// Span of the admission rate window.
pub const ADMISSION_WINDOW: TimeDelta = TimeDelta::seconds(60);

/// Position of a queued job: higher priority first, then admission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueSlot {
    priority: crate::job::Priority,
    seq: u64,
}

impl PartialOrd for QueueSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority sorts first
        match other.priority.cmp(&self.priority) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            other => other,
        }
    }
}

/// A requested status change together with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Processing,
    Completed(JobResult),
    Failed(JobError),
}

impl StatusUpdate {
    /// Target status of this update.
    pub fn status(&self) -> JobStatus {
        match self {
            StatusUpdate::Processing => JobStatus::Processing,
            StatusUpdate::Completed(_) => JobStatus::Completed,
            StatusUpdate::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Counts of jobs currently held by the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    /// Mean time from claim to completion over completed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_processing_ms: Option<f64>,
}

impl QueueStats {
    /// Jobs not yet finished.
    pub fn active(&self) -> u64 {
        self.queued + self.processing
    }

    /// Total finished jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Fraction of finished jobs that completed.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some(self.completed as f64 / total as f64)
        }
    }
}

/// Sole owner of job records, admission policy, and lifecycle transitions.
///
/// Every method runs to completion without suspending; callers that share a
/// queue across tasks must serialize access (see `preview_actors::QueueActor`).
#[derive(Debug)]
pub struct JobQueue {
    config: QueueConfig,
    clock: SharedClock,
    jobs: HashMap<JobId, Job>,
    /// Queued jobs in selection order.
    pending: BTreeMap<QueueSlot, JobId>,
    slots: HashMap<JobId, QueueSlot>,
    processing: HashSet<JobId>,
    request_jobs: HashMap<String, Vec<JobId>>,
    /// Admission timestamps inside the trailing window, oldest first.
    admissions: VecDeque<DateTime<Utc>>,
    next_seq: u64,
}

impl JobQueue {
    /// Create a queue on the system clock.
    pub fn new(config: QueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            jobs: HashMap::new(),
            pending: BTreeMap::new(),
            slots: HashMap::new(),
            processing: HashSet::new(),
            request_jobs: HashMap::new(),
            admissions: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a new job.
    ///
    /// Checks run in order: queue size, per-request quota, admission rate.
    /// A rejection leaves the queue untouched.
    pub fn enqueue(&mut self, request: EnqueueRequest) -> Result<Job, AdmissionError> {
        let now = self.clock.now();

        let limit = self.config.max_queue_size;
        if self.jobs.len() >= limit {
            tracing::warn!("Rejecting job: queue full ({}/{})", self.jobs.len(), limit);
            return Err(AdmissionError::QueueFull {
                current: self.jobs.len(),
                limit,
            });
        }

        if let Some(request_id) = request.request_id.as_deref() {
            let limit = self.config.rate_limit.per_request;
            let current = self.get_request_job_count(request_id);
            if current >= limit {
                tracing::warn!(
                    "Rejecting job: request {} at quota ({}/{})",
                    request_id,
                    current,
                    limit
                );
                return Err(AdmissionError::RequestQuotaExceeded {
                    request_id: request_id.to_string(),
                    current,
                    limit,
                });
            }
        }

        self.prune_admissions(now);
        let limit = self.config.rate_limit.per_minute;
        if self.admissions.len() >= limit {
            let retry_at = self
                .admissions
                .front()
                .map_or(now, |oldest| *oldest + ADMISSION_WINDOW);
            tracing::warn!(
                "Rejecting job: admission rate limit reached ({}/{})",
                self.admissions.len(),
                limit
            );
            return Err(AdmissionError::RateLimited {
                current: self.admissions.len(),
                limit,
                retry_at,
            });
        }

        let job = Job::admit(request, self.config.default_priority, now);
        let slot = QueueSlot {
            priority: job.priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        self.pending.insert(slot, job.id);
        self.slots.insert(job.id, slot);
        if let Some(request_id) = &job.request_id {
            self.request_jobs
                .entry(request_id.clone())
                .or_default()
                .push(job.id);
        }
        self.admissions.push_back(now);
        self.jobs.insert(job.id, job.clone());

        tracing::debug!("Job {} admitted ({}, {})", job.id, job.kind, job.priority);
        Ok(job)
    }

    /// Claim the best queued job and mark it processing.
    ///
    /// Returns `None` when nothing is queued or the concurrency limit is reached.
    pub fn process_next(&mut self) -> Option<Job> {
        if self.processing.len() >= self.config.max_concurrent {
            return None;
        }

        let (_, job_id) = self.pending.pop_first()?;
        self.slots.remove(&job_id);

        let now = self.clock.now();
        let job = self.jobs.get_mut(&job_id)?;
        job.status = JobStatus::Processing;
        job.started_at = Some(now);
        job.updated_at = now;
        job.attempts = job.attempts.saturating_add(1);
        let claimed = job.clone();

        self.processing.insert(job_id);
        tracing::debug!("Job {} claimed (attempt {})", job_id, claimed.attempts);
        Some(claimed)
    }

    /// Apply a lifecycle transition.
    pub fn update_status(
        &mut self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<Job, TransitionError> {
        let now = self.clock.now();
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(TransitionError::NotFound(job_id))?;

        let from = job.status;
        let to = update.status();
        if !from.can_transition_to(to) {
            return Err(TransitionError::InvalidTransition { job_id, from, to });
        }

        match update {
            StatusUpdate::Processing => {
                job.started_at = Some(now);
                job.attempts = job.attempts.saturating_add(1);
            }
            StatusUpdate::Completed(result) => {
                job.result = Some(result);
                job.error = None;
                job.progress = 100;
                job.completed_at = Some(now);
            }
            StatusUpdate::Failed(error) => {
                job.error = Some(error);
                job.result = None;
                job.completed_at = Some(now);
            }
        }
        job.status = to;
        job.updated_at = now;
        let updated = job.clone();

        if from == JobStatus::Queued
            && let Some(slot) = self.slots.remove(&job_id)
        {
            self.pending.remove(&slot);
        }
        if to == JobStatus::Processing {
            self.processing.insert(job_id);
        } else {
            self.processing.remove(&job_id);
        }

        tracing::debug!("Job {} {} -> {}", job_id, from, to);
        Ok(updated)
    }

    /// Update the progress hint of a processing job, clamped to 100.
    pub fn update_progress(&mut self, job_id: JobId, progress: u8) -> Result<Job, TransitionError> {
        let now = self.clock.now();
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(TransitionError::NotFound(job_id))?;

        if job.status != JobStatus::Processing {
            return Err(TransitionError::NotProcessing {
                job_id,
                status: job.status,
            });
        }

        job.progress = progress.min(100);
        job.updated_at = now;
        Ok(job.clone())
    }

    pub fn get_job(&self, job_id: JobId) -> Option<Job> {
        self.jobs.get(&job_id).cloned()
    }

    /// Queued jobs in selection order.
    pub fn get_queued(&self) -> Vec<Job> {
        self.pending
            .values()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect()
    }

    /// Processing jobs, earliest claim first.
    pub fn get_processing(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .processing
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.started_at, job.id));
        jobs
    }

    /// Jobs admitted under a request id, in admission order.
    pub fn get_request_jobs(&self, request_id: &str) -> Vec<Job> {
        self.request_jobs
            .get(request_id)
            .map(|ids| ids.iter().filter_map(|id| self.jobs.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_request_job_count(&self, request_id: &str) -> usize {
        self.request_jobs.get(request_id).map_or(0, Vec::len)
    }

    pub fn get_stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.jobs.len() as u64,
            ..QueueStats::default()
        };
        let mut processing_ms = 0.0;
        let mut timed = 0u64;

        for job in self.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let Some(elapsed) = job.processing_time() {
                        processing_ms += elapsed.num_milliseconds() as f64;
                        timed += 1;
                    }
                }
                JobStatus::Failed => stats.failed += 1,
            }
        }

        if timed > 0 {
            stats.avg_processing_ms = Some(processing_ms / timed as f64);
        }
        stats
    }

    /// Discard every job and admission counter.
    pub fn clear(&mut self) {
        self.jobs.clear();
        self.pending.clear();
        self.slots.clear();
        self.processing.clear();
        self.request_jobs.clear();
        self.admissions.clear();
    }

    /// Remove terminal jobs that finished more than `max_age_secs` ago.
    ///
    /// Queued and processing jobs are never removed. Returns the number of
    /// jobs dropped.
    pub fn clean_old_jobs(&mut self, max_age_secs: u64) -> usize {
        let now = self.clock.now();
        let max_age = secs_to_delta(max_age_secs);

        let expired: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal()
                    && now - job.completed_at.unwrap_or(job.updated_at) > max_age
            })
            .map(|job| job.id)
            .collect();

        for job_id in &expired {
            let Some(job) = self.jobs.remove(job_id) else {
                continue;
            };
            if let Some(request_id) = job.request_id {
                let now_empty = self.request_jobs.get_mut(&request_id).is_some_and(|ids| {
                    ids.retain(|id| id != job_id);
                    ids.is_empty()
                });
                if now_empty {
                    self.request_jobs.remove(&request_id);
                }
            }
        }

        if !expired.is_empty() {
            tracing::debug!("Cleaned {} finished jobs", expired.len());
        }
        expired.len()
    }

    fn prune_admissions(&mut self, now: DateTime<Utc>) {
        while self
            .admissions
            .front()
            .is_some_and(|ts| now - *ts >= ADMISSION_WINDOW)
        {
            self.admissions.pop_front();
        }
    }
}
