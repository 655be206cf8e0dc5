//! Executor trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use preview_core::{ErrorCode, ExecutionError, Job, JobId, JobKind, JobResult};

use crate::handle::QueueHandle;

/// Result type for executors.
pub type ExecutionResult = Result<JobResult, ExecutionError>;

/// Future type for async executors.
pub type ExecutionFuture = Pin<Box<dyn Future<Output = ExecutionResult> + Send>>;

/// Reports progress of one running job back to the queue.
///
/// Cheap to clone into the executor's future. A detached reporter drops
/// every update.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    queue: Option<QueueHandle>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, queue: QueueHandle) -> Self {
        Self {
            job_id,
            queue: Some(queue),
        }
    }

    pub fn detached(job_id: JobId) -> Self {
        Self {
            job_id,
            queue: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Set the job's progress to `percent` (clamped to 100).
    ///
    /// Refusals are logged and swallowed: the job may have been cancelled
    /// while the executor was still working.
    pub async fn report(&self, percent: u8) {
        let Some(queue) = &self.queue else {
            return;
        };
        if let Err(e) = queue.update_progress(self.job_id, percent).await {
            tracing::debug!("Dropped progress {} for job {}: {}", percent, self.job_id, e);
        }
    }
}

/// The capability that actually produces a job's result.
///
/// Workers call `execute` once per attempt, passing a [`ProgressReporter`]
/// for the job. Implementations report failures as [`ExecutionError`]s and
/// mark them transient when a retry may succeed. The returned future may be
/// dropped at any await point when the job is cancelled or times out.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: &Job, progress: ProgressReporter) -> ExecutionFuture;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: &Job, progress: ProgressReporter) -> ExecutionFuture {
        (**self).execute(job, progress)
    }
}

/// Registry routing jobs to an executor per [`JobKind`].
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor for a job kind, replacing any previous one.
    pub fn register<E: Executor>(&mut self, kind: JobKind, executor: E) {
        self.executors.insert(kind, Arc::new(executor));
    }

    /// Builder form of [`ExecutorRegistry::register`].
    pub fn with<E: Executor>(mut self, kind: JobKind, executor: E) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn Executor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn has_executor(&self, kind: JobKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// List all registered job kinds.
    pub fn kinds(&self) -> Vec<JobKind> {
        self.executors.keys().copied().collect()
    }
}

impl Executor for ExecutorRegistry {
    fn execute(&self, job: &Job, progress: ProgressReporter) -> ExecutionFuture {
        match self.get(job.kind) {
            Some(executor) => executor.execute(job, progress),
            None => {
                let error = ExecutionError::permanent(
                    ErrorCode::UnsupportedJobType,
                    format!("no executor for job type: {}", job.kind),
                );
                Box::pin(async move { Err(error) })
            }
        }
    }
}

/// A simple function-based executor.
pub struct FnExecutor<F>
where
    F: Fn(&Job, ProgressReporter) -> ExecutionFuture + Send + Sync + 'static,
{
    executor: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&Job, ProgressReporter) -> ExecutionFuture + Send + Sync + 'static,
{
    pub fn new(executor: F) -> Self {
        Self { executor }
    }
}

impl<F> Executor for FnExecutor<F>
where
    F: Fn(&Job, ProgressReporter) -> ExecutionFuture + Send + Sync + 'static,
{
    fn execute(&self, job: &Job, progress: ProgressReporter) -> ExecutionFuture {
        (self.executor)(job, progress)
    }
}

/// Build an [`FnExecutor`] from an async block over an owned copy of the job,
/// optionally binding its [`ProgressReporter`].
#[macro_export]
macro_rules! executor_fn {
    (|$job:ident| $body:expr) => {
        $crate::executor_fn!(|$job, _progress| $body)
    };
    (|$job:ident, $progress:ident| $body:expr) => {
        $crate::FnExecutor::new(
            |$job: &$crate::preview_core::Job, $progress: $crate::ProgressReporter| {
                let $job = $job.clone();
                Box::pin(async move { $body })
            },
        )
    };
}
