#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use preview_actors::{
    Actor, ExecutionResult, ExecutorRegistry, JobSystem, QueueActor, QueueActorState,
    QueueHandle, TrackerActor, TrackerHandle, WorkerActor, WorkerArgs, WorkerMessage,
    executor_fn,
};
use preview_core::{
    EnqueueRequest, ErrorCode, ExecutionError, ExportFormat, ExportPayload, JobKind, JobQueue,
    JobResult, JobStatus, JobTracker, PreviewPayload, RetryPolicy,
};
use tokio_util::sync::CancellationToken;

use common::{FlakyExecutor, HangingExecutor, SucceedingExecutor};

#[tokio::test]
async fn test_worker_completes_job() -> Result<(), Box<dyn Error>> {
    let executor = SucceedingExecutor::new();
    let calls = executor.calls.clone();
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let submission = system.submit(common::preview("a fox at dawn")).await?;
    assert!(!submission.duplicate);

    let job = common::wait_for_terminal(&system, submission.job.id).await?;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.attempts, 1);
    let result = job.result.ok_or("no result")?;
    assert!(result.video_url.is_some_and(|url| url.ends_with(".mp4")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the transition is mirrored once the queue write is done
    let history = system.tracker().get_job_history(job.id).await?;
    let steps: Vec<_> = history.iter().map(|r| (r.from, r.to)).collect();
    assert_eq!(
        steps,
        vec![
            (JobStatus::Queued, JobStatus::Processing),
            (JobStatus::Processing, JobStatus::Completed),
        ]
    );
    let stats = system.tracker().get_global_stats().await?;
    assert_eq!(stats.completed_jobs, 1);
    assert_eq!(stats.total_jobs, 1);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<(), Box<dyn Error>> {
    let executor = FlakyExecutor::transient(2);
    let calls = executor.calls.clone();
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let submission = system.submit(common::preview("retry me")).await?;
    let job = common::wait_for_terminal(&system, submission.job.id).await?;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_retry_budget_exhausted() -> Result<(), Box<dyn Error>> {
    let executor = FlakyExecutor::transient(10);
    let calls = executor.calls.clone();
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let submission = system.submit(common::preview("always down")).await?;
    let job = common::wait_for_terminal(&system, submission.job.id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.ok_or("no error")?;
    assert_eq!(error.code, ErrorCode::ProviderUnavailable);
    assert_eq!(error.message, "attempt 3 failed");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let history = system.tracker().get_job_history(job.id).await?;
    let last = history.last().ok_or("no history")?;
    assert_eq!(last.to, JobStatus::Failed);
    assert!(last.metadata.is_some());

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() -> Result<(), Box<dyn Error>> {
    let executor = FlakyExecutor::permanent();
    let calls = executor.calls.clone();
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let submission = system.submit(common::preview("blocked")).await?;
    let job = common::wait_for_terminal(&system, submission.job.id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.map(|e| e.code),
        Some(ErrorCode::ProviderPolicyBlocked)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_payload_fails_without_executing() -> Result<(), Box<dyn Error>> {
    let executor = SucceedingExecutor::new();
    let calls = executor.calls.clone();
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let mut payload = PreviewPayload::new("veo-1", "a valid prompt");
    payload.duration_secs = 30;
    let submission = system.submit(EnqueueRequest::new(payload)).await?;
    let job = common::wait_for_terminal(&system, submission.job.id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.ok_or("no error")?;
    assert_eq!(error.code, ErrorCode::InvalidPayload);
    assert!(error.fix.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_execution_timeout() -> Result<(), Box<dyn Error>> {
    let mut config = common::fast_config(1);
    config.worker.execution_timeout_secs = 1;
    config.worker.retry = RetryPolicy::none();
    let system = JobSystem::start(config, HangingExecutor).await?;

    let submission = system.submit(common::preview("slow provider")).await?;
    let job = common::wait_for_terminal(&system, submission.job.id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.map(|e| e.code), Some(ErrorCode::ProviderTimeout));

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_processing_job() -> Result<(), Box<dyn Error>> {
    let system = JobSystem::start(common::fast_config(1), HangingExecutor).await?;

    let submission = system.submit(common::preview("stuck")).await?;
    let job_id = submission.job.id;
    common::wait_for(&system, job_id, |job| job.status == JobStatus::Processing).await?;

    assert!(system.cancel_job(job_id).await?);
    let job = common::wait_for_terminal(&system, job_id).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.map(|e| e.code), Some(ErrorCode::Cancelled));

    // the worker is free again
    let next = system.submit(common::preview("next")).await?;
    common::wait_for(&system, next.job.id, |job| job.status == JobStatus::Processing).await?;

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_submit_is_idempotent() -> Result<(), Box<dyn Error>> {
    let system = JobSystem::start(common::fast_config(1), HangingExecutor).await?;

    let request = || {
        common::preview("same thing twice")
            .with_idempotency_key("idem-1")
            .with_request_id("req-1")
    };
    let first = system.submit(request()).await?;
    let second = system.submit(request()).await?;

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.job.id, second.job.id);
    assert_eq!(system.queue().get_stats().await?.total, 1);
    assert_eq!(
        system.tracker().get_jobs_by_request_id("req-1").await?,
        vec![first.job.id]
    );

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_registry_routes_by_kind() -> Result<(), Box<dyn Error>> {
    let registry = ExecutorRegistry::new().with(
        JobKind::Preview,
        executor_fn!(|job| {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(JobResult::video(format!("https://cdn.test/{}.mp4", job.id)))
        }),
    );
    assert!(registry.has_executor(JobKind::Preview));
    assert!(!registry.has_executor(JobKind::Export));

    let system = JobSystem::start(common::fast_config(2), registry).await?;

    let preview = system.submit(common::preview("routed")).await?;
    let export = system
        .submit(EnqueueRequest::new(ExportPayload {
            source_id: "doc-1".to_string(),
            format: ExportFormat::Vdp,
        }))
        .await?;

    let preview = common::wait_for_terminal(&system, preview.job.id).await?;
    assert_eq!(preview.status, JobStatus::Completed);

    let export = common::wait_for_terminal(&system, export.job.id).await?;
    assert_eq!(export.status, JobStatus::Failed);
    assert_eq!(
        export.error.map(|e| e.code),
        Some(ErrorCode::UnsupportedJobType)
    );

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_settles_in_flight_job() -> Result<(), Box<dyn Error>> {
    let config = common::fast_config(1);
    let (queue_ref, queue_join) = Actor::spawn(
        None,
        QueueActor,
        QueueActorState::new(JobQueue::new(config.queue.clone()), 0),
    )
    .await?;
    let (tracker_ref, tracker_join) =
        Actor::spawn(None, TrackerActor, JobTracker::new(config.tracker.clone())).await?;
    let queue = QueueHandle::new(queue_ref.clone());
    let tracker = TrackerHandle::new(tracker_ref.clone());

    let (worker, worker_join) = Actor::spawn(
        None,
        WorkerActor,
        WorkerArgs {
            worker_id: "worker-shutdown".to_string(),
            queue: queue.clone(),
            tracker: tracker.clone(),
            executor: Arc::new(HangingExecutor),
            config: config.worker.clone(),
            cancel: CancellationToken::new(),
        },
    )
    .await?;

    let job = queue.enqueue(common::preview("interrupted")).await?;
    let mut started = false;
    for _ in 0..500 {
        if queue.get_job(job.id).await?.map(|j| j.status) == Some(JobStatus::Processing) {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(started, "job {} was never claimed", job.id);

    worker.send_message(WorkerMessage::Shutdown)?;
    tokio::time::timeout(Duration::from_secs(5), worker_join).await??;

    // the queue outlives the worker, so the settled outcome is visible
    let settled = queue.get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(settled.status, JobStatus::Failed);
    assert_eq!(settled.error.map(|e| e.code), Some(ErrorCode::Cancelled));
    assert!(settled.completed_at.is_some());

    let history = tracker.get_job_history(job.id).await?;
    let steps: Vec<_> = history.iter().map(|r| (r.from, r.to)).collect();
    assert_eq!(
        steps,
        vec![
            (JobStatus::Queued, JobStatus::Processing),
            (JobStatus::Processing, JobStatus::Failed),
        ]
    );

    queue_ref.stop(None);
    tracker_ref.stop(None);
    queue_join.await?;
    tracker_join.await?;
    Ok(())
}

#[tokio::test]
async fn test_executor_reports_progress() -> Result<(), Box<dyn Error>> {
    let executor = executor_fn!(|_job, progress| {
        progress.report(50).await;
        std::future::pending::<ExecutionResult>().await
    });
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let submission = system.submit(common::preview("halfway there")).await?;
    let job = common::wait_for(&system, submission.job.id, |job| {
        job.status == JobStatus::Processing && job.progress == 50
    })
    .await?;
    assert!(job.result.is_none());

    // progress stops counting once the job is settled
    assert!(system.cancel_job(job.id).await?);
    let job = common::wait_for_terminal(&system, job.id).await?;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(system.queue().update_progress(job.id, 60).await.is_err());

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_executor_errors_map_to_job_errors() -> Result<(), Box<dyn Error>> {
    let executor = executor_fn!(|_job| {
        Err(ExecutionError::permanent(
            ErrorCode::ProviderQuotaExceeded,
            "daily quota used",
        ))
    });
    let system = JobSystem::start(common::fast_config(1), executor).await?;

    let submission = system.submit(common::preview("over quota")).await?;
    let job = common::wait_for_terminal(&system, submission.job.id).await?;
    let error = job.error.ok_or("no error")?;
    assert_eq!(error.code, ErrorCode::ProviderQuotaExceeded);
    assert_eq!(error.retry_after_secs, Some(3600));

    system.shutdown().await;
    Ok(())
}
