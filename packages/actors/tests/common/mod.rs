#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use preview_actors::{ExecutionFuture, ExecutionResult, Executor, JobSystem, ProgressReporter};
use preview_core::{
    EnqueueRequest, ErrorCode, ExecutionError, HousekeepingConfig, Job, JobId, JobResult,
    PreviewPayload, RetryPolicy, SystemConfig, WorkerConfig,
};

/// Config with fast polling and short backoffs, no housekeeping.
pub fn fast_config(workers: usize) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.queue = config.queue.with_rate_limit(1000, 100);
    config.worker = WorkerConfig {
        workers,
        poll_interval_ms: 10,
        execution_timeout_secs: 5,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 5,
            max_delay_ms: 20,
            ..RetryPolicy::default()
        },
    };
    config.housekeeping = HousekeepingConfig {
        interval_secs: 0,
        ..HousekeepingConfig::default()
    };
    config
}

pub fn preview(prompt: &str) -> EnqueueRequest {
    EnqueueRequest::new(PreviewPayload::new("veo-test", prompt))
}

/// Poll the queue until the job reaches a terminal status.
pub async fn wait_for_terminal(system: &JobSystem, job_id: JobId) -> Result<Job, Box<dyn Error>> {
    wait_for(system, job_id, |job| job.status.is_terminal()).await
}

pub async fn wait_for<P>(system: &JobSystem, job_id: JobId, done: P) -> Result<Job, Box<dyn Error>>
where
    P: Fn(&Job) -> bool,
{
    for _ in 0..500 {
        if let Some(job) = system.queue().get_job(job_id).await?
            && done(&job)
        {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(format!("job {job_id} did not reach the expected state").into())
}

/// Executor that always succeeds with a video URL derived from the job id.
pub struct SucceedingExecutor {
    pub calls: Arc<AtomicU32>,
}

impl SucceedingExecutor {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Executor for SucceedingExecutor {
    fn execute(&self, job: &Job, _progress: ProgressReporter) -> ExecutionFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = format!("https://cdn.test/previews/{}.mp4", job.id);
        Box::pin(async move { Ok(JobResult::video(url)) })
    }
}

/// Executor that fails a fixed number of times before succeeding.
pub struct FlakyExecutor {
    failures: u32,
    transient: bool,
    pub calls: Arc<AtomicU32>,
}

impl FlakyExecutor {
    pub fn transient(failures: u32) -> Self {
        Self {
            failures,
            transient: true,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn permanent() -> Self {
        Self {
            failures: u32::MAX,
            transient: false,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Executor for FlakyExecutor {
    fn execute(&self, _job: &Job, _progress: ProgressReporter) -> ExecutionFuture {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if call < self.failures {
            let code = if self.transient {
                ErrorCode::ProviderUnavailable
            } else {
                ErrorCode::ProviderPolicyBlocked
            };
            Err(ExecutionError {
                transient: self.transient,
                code,
                message: format!("attempt {} failed", call + 1),
            })
        } else {
            Ok(JobResult::video("https://cdn.test/previews/flaky.mp4"))
        };
        Box::pin(async move { outcome })
    }
}

/// Executor that never finishes on its own.
pub struct HangingExecutor;

impl Executor for HangingExecutor {
    fn execute(&self, _job: &Job, _progress: ProgressReporter) -> ExecutionFuture {
        Box::pin(std::future::pending::<ExecutionResult>())
    }
}
