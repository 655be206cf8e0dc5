//! Stand-in preview executor for running the worker without a provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use preview_actors::{ExecutionFuture, Executor, ProgressReporter};
use preview_core::{ErrorCode, ExecutionError, Job, JobPayload, JobResult};

/// Number of progress steps reported while the simulated render runs.
const PROGRESS_STEPS: u32 = 10;

/// Renders nothing; waits a fixed time and returns a placeholder clip.
/// Progress climbs in 10% steps up to 90 while it waits.
///
/// Every `fail_every`-th call fails with a transient provider error so the
/// retry path gets exercised. Zero disables the failures.
pub struct SimulatedExecutor {
    delay: Duration,
    fail_every: u64,
    calls: Arc<AtomicU64>,
}

impl SimulatedExecutor {
    pub fn new(delay: Duration, fail_every: u64) -> Self {
        Self {
            delay,
            fail_every,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Executor for SimulatedExecutor {
    fn execute(&self, job: &Job, progress: ProgressReporter) -> ExecutionFuture {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let fail = self.fail_every > 0 && call % self.fail_every == 0;
        let delay = self.delay;
        let job_id = job.id;
        let format = match &job.payload {
            JobPayload::Preview(preview) => Some((preview.aspect_ratio, preview.quality)),
            _ => None,
        };

        Box::pin(async move {
            let step = delay / PROGRESS_STEPS;
            for i in 1..PROGRESS_STEPS {
                tokio::time::sleep(step).await;
                progress.report((i * 100 / PROGRESS_STEPS) as u8).await;
            }
            tokio::time::sleep(step).await;
            if fail {
                return Err(ExecutionError::transient(
                    ErrorCode::ProviderUnavailable,
                    "simulated provider outage",
                ));
            }

            let mut result = JobResult::video(format!("/previews/{}.mp4", job_id));
            result.duration_secs = Some(preview_core::PREVIEW_DURATION_SECS);
            if let Some((aspect_ratio, quality)) = format {
                result.aspect_ratio = Some(aspect_ratio.as_str().to_string());
                result.quality = Some(quality.as_str().to_string());
            }
            Ok(result)
        })
    }
}
