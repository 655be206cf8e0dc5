//! Idempotency, request correlation, transition history, and client rate windows.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, SystemClock, add_secs, secs_to_delta};
use crate::config::TrackerConfig;
use crate::job::{JobId, JobStatus};

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregates over every recorded terminal transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub success_rate: f64,
}

/// What a cleanup pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_keys: usize,
    pub stale_requests: usize,
    pub idle_clients: usize,
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    job_id: JobId,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RequestEntry {
    job_ids: Vec<JobId>,
    last_seen_at: DateTime<Utc>,
}

/// Bookkeeping that sits beside the queue.
///
/// Expired idempotency keys are dropped lazily on read; [`JobTracker::run_cleanup`]
/// sweeps them in bulk without changing what any read returns.
#[derive(Debug)]
pub struct JobTracker {
    config: TrackerConfig,
    clock: SharedClock,
    idempotency_keys: HashMap<String, IdempotencyRecord>,
    requests: HashMap<String, RequestEntry>,
    history: HashMap<JobId, Vec<TransitionRecord>>,
    finished_jobs: HashSet<JobId>,
    completed_jobs: u64,
    failed_jobs: u64,
    rate_windows: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl JobTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TrackerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            idempotency_keys: HashMap::new(),
            requests: HashMap::new(),
            history: HashMap::new(),
            finished_jobs: HashSet::new(),
            completed_jobs: 0,
            failed_jobs: 0,
            rate_windows: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // Idempotency

    /// Map `key` to `job_id` with the default TTL. See [`Self::set_idempotency_key_with_ttl`].
    pub fn set_idempotency_key(&mut self, key: impl Into<String>, job_id: JobId) -> bool {
        let ttl = self.config.idempotency_ttl_secs;
        self.set_idempotency_key_with_ttl(key, job_id, ttl)
    }

    /// Map `key` to `job_id` unless a live mapping already exists.
    ///
    /// Returns whether the mapping was stored.
    pub fn set_idempotency_key_with_ttl(
        &mut self,
        key: impl Into<String>,
        job_id: JobId,
        ttl_secs: u64,
    ) -> bool {
        let key = key.into();
        if self.lookup_idempotency_key(&key).is_some() {
            return false;
        }

        let expires_at = add_secs(self.clock.now(), ttl_secs);
        self.idempotency_keys
            .insert(key, IdempotencyRecord { job_id, expires_at });
        true
    }

    pub fn get_job_by_idempotency_key(&mut self, key: &str) -> Option<JobId> {
        self.lookup_idempotency_key(key)
    }

    pub fn has_idempotency_key(&mut self, key: &str) -> bool {
        self.lookup_idempotency_key(key).is_some()
    }

    /// Remove the mapping for `key` if it still points at `job_id`.
    ///
    /// Used when the mapped job no longer exists, so a fresh submission can
    /// claim the key. A key already remapped to another job is left alone.
    pub fn remove_idempotency_key(&mut self, key: &str, job_id: JobId) -> bool {
        match self.idempotency_keys.get(key) {
            Some(record) if record.job_id == job_id => {
                self.idempotency_keys.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn clean_expired_idempotency_keys(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.idempotency_keys.len();
        self.idempotency_keys
            .retain(|_, record| now <= record.expires_at);
        before - self.idempotency_keys.len()
    }

    fn lookup_idempotency_key(&mut self, key: &str) -> Option<JobId> {
        let now = self.clock.now();
        let IdempotencyRecord { job_id, expires_at } = self.idempotency_keys.get(key)?.clone();
        if now > expires_at {
            self.idempotency_keys.remove(key);
            return None;
        }
        Some(job_id)
    }

    // Request correlation

    /// Associate a job with a request; repeated associations are ignored.
    pub fn add_job_to_request(&mut self, request_id: impl Into<String>, job_id: JobId) {
        let now = self.clock.now();
        let entry = self
            .requests
            .entry(request_id.into())
            .or_insert_with(|| RequestEntry {
                job_ids: Vec::new(),
                last_seen_at: now,
            });
        if !entry.job_ids.contains(&job_id) {
            entry.job_ids.push(job_id);
        }
        entry.last_seen_at = now;
    }

    pub fn get_jobs_by_request_id(&self, request_id: &str) -> Vec<JobId> {
        self.requests
            .get(request_id)
            .map(|entry| entry.job_ids.clone())
            .unwrap_or_default()
    }

    pub fn get_request_job_count(&self, request_id: &str) -> usize {
        self.requests
            .get(request_id)
            .map_or(0, |entry| entry.job_ids.len())
    }

    /// Drop requests not seen for more than `max_age_secs`.
    pub fn clean_old_requests(&mut self, max_age_secs: u64) -> usize {
        let now = self.clock.now();
        let max_age = secs_to_delta(max_age_secs);
        let before = self.requests.len();
        self.requests
            .retain(|_, entry| now - entry.last_seen_at <= max_age);
        before - self.requests.len()
    }

    // History

    pub fn record_transition(&mut self, job_id: JobId, from: JobStatus, to: JobStatus) {
        self.record_transition_with_metadata(job_id, from, to, None);
    }

    pub fn record_transition_with_metadata(
        &mut self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        metadata: Option<serde_json::Value>,
    ) {
        let record = TransitionRecord {
            job_id,
            from,
            to,
            timestamp: self.clock.now(),
            metadata,
        };
        self.history.entry(job_id).or_default().push(record);

        if from == JobStatus::Processing {
            match to {
                JobStatus::Completed => self.completed_jobs += 1,
                JobStatus::Failed => self.failed_jobs += 1,
                _ => return,
            }
            self.finished_jobs.insert(job_id);
        }
    }

    /// Transitions of one job, oldest first.
    pub fn get_job_history(&self, job_id: JobId) -> Vec<TransitionRecord> {
        self.history.get(&job_id).cloned().unwrap_or_default()
    }

    pub fn get_global_stats(&self) -> GlobalStats {
        let processed = self.completed_jobs + self.failed_jobs;
        let success_rate = if processed > 0 {
            self.completed_jobs as f64 / processed as f64
        } else {
            0.0
        };
        GlobalStats {
            total_jobs: self.finished_jobs.len() as u64,
            completed_jobs: self.completed_jobs,
            failed_jobs: self.failed_jobs,
            success_rate,
        }
    }

    // Client rate windows

    pub fn record_request(&mut self, client_id: impl Into<String>) {
        let now = self.clock.now();
        self.rate_windows
            .entry(client_id.into())
            .or_default()
            .push_back(now);
    }

    /// Requests from `client_id` within the trailing window.
    pub fn get_request_count(&mut self, client_id: &str, window_secs: u64) -> usize {
        let now = self.clock.now();
        let window = secs_to_delta(window_secs);
        let Some(timestamps) = self.rate_windows.get_mut(client_id) else {
            return 0;
        };

        while timestamps.front().is_some_and(|ts| now - *ts >= window) {
            timestamps.pop_front();
        }
        let count = timestamps.len();
        if count == 0 {
            self.rate_windows.remove(client_id);
        }
        count
    }

    /// Earliest time at which `client_id` may make another request.
    ///
    /// When the window already holds `max_requests` entries this is the
    /// moment the oldest one ages out; otherwise it is now.
    pub fn get_next_available_slot(
        &mut self,
        client_id: &str,
        max_requests: usize,
        window_secs: u64,
    ) -> DateTime<Utc> {
        let now = self.clock.now();
        if self.get_request_count(client_id, window_secs) < max_requests {
            return now;
        }
        self.rate_windows
            .get(client_id)
            .and_then(|timestamps| timestamps.front())
            .map_or(now, |oldest| add_secs(*oldest, window_secs))
    }

    /// Trim every client window to `window_secs`. Returns how many clients were dropped.
    pub fn clean_old_rate_limits(&mut self, window_secs: u64) -> usize {
        let now = self.clock.now();
        let window = secs_to_delta(window_secs);
        let before = self.rate_windows.len();
        self.rate_windows.retain(|_, timestamps| {
            timestamps.retain(|ts| now - *ts < window);
            !timestamps.is_empty()
        });
        before - self.rate_windows.len()
    }

    /// Sweep expired keys, idle requests, and empty windows using the configured ages.
    pub fn run_cleanup(&mut self) -> CleanupReport {
        let report = CleanupReport {
            expired_keys: self.clean_expired_idempotency_keys(),
            stale_requests: self.clean_old_requests(self.config.request_retention_secs),
            idle_clients: self.clean_old_rate_limits(self.config.rate_window_secs),
        };
        if report != CleanupReport::default() {
            tracing::debug!("Tracker cleanup: {:?}", report);
        }
        report
    }

    /// Reset all bookkeeping.
    pub fn clear(&mut self) {
        self.idempotency_keys.clear();
        self.requests.clear();
        self.history.clear();
        self.finished_jobs.clear();
        self.completed_jobs = 0;
        self.failed_jobs = 0;
        self.rate_windows.clear();
    }
}
