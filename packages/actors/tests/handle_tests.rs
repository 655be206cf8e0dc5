#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use futures_util::future::join_all;
use preview_actors::{ActorError, JobSystem, ProgressReporter};
use preview_core::{
    AdmissionError, Clock, ErrorCode, JobError, JobStatus, ManualClock, Priority, StatusUpdate,
    TransitionError,
};

async fn start_idle(
    configure: impl FnOnce(&mut preview_core::SystemConfig),
) -> Result<(JobSystem, ManualClock), Box<dyn Error>> {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap());
    let mut config = common::fast_config(0);
    configure(&mut config);
    let system = JobSystem::start_with_clock(config, NoopExecutor, Arc::new(clock.clone())).await?;
    Ok((system, clock))
}

/// Never called: these systems have no workers.
struct NoopExecutor;

impl preview_actors::Executor for NoopExecutor {
    fn execute(
        &self,
        _job: &preview_core::Job,
        _progress: ProgressReporter,
    ) -> preview_actors::ExecutionFuture {
        Box::pin(async { Err(preview_core::ExecutionError::cancelled()) })
    }
}

#[tokio::test]
async fn test_admission_limits_through_handle() -> Result<(), Box<dyn Error>> {
    let (system, clock) = start_idle(|config| {
        config.queue = config.queue.clone().with_rate_limit(3, 2);
    })
    .await?;
    let queue = system.queue();

    queue.enqueue(common::preview("a").with_request_id("req-1")).await?;
    queue.enqueue(common::preview("b").with_request_id("req-1")).await?;

    let quota = queue
        .enqueue(common::preview("c").with_request_id("req-1"))
        .await;
    assert!(matches!(
        quota,
        Err(ActorError::Admission(AdmissionError::RequestQuotaExceeded {
            current: 2,
            limit: 2,
            ..
        }))
    ));

    queue.enqueue(common::preview("d")).await?;
    let rate = queue.enqueue(common::preview("e")).await;
    let Err(ActorError::Admission(err @ AdmissionError::RateLimited { .. })) = rate else {
        panic!("expected rate limit, got {rate:?}");
    };
    assert_eq!(err.code(), ErrorCode::RateLimited);
    assert_eq!(err.retry_after_secs(clock.now()), 60);

    // rejected jobs are not counted
    assert_eq!(queue.get_stats().await?.total, 3);

    clock.advance_secs(60);
    queue.enqueue(common::preview("f")).await?;
    assert_eq!(queue.get_stats().await?.total, 4);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_claims_respect_limit() -> Result<(), Box<dyn Error>> {
    let (system, _clock) = start_idle(|config| {
        config.queue = config.queue.clone().with_max_concurrent(3);
    })
    .await?;

    for i in 0..6 {
        system.queue().enqueue(common::preview(&format!("job {i}"))).await?;
    }

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let queue = system.queue().clone();
        tasks.push(tokio::spawn(async move { queue.process_next().await }));
    }

    let mut claimed = HashSet::new();
    for task in tasks {
        if let Some(job) = task.await?? {
            assert_eq!(job.status, JobStatus::Processing);
            assert!(claimed.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert_eq!(claimed.len(), 3);

    let stats = system.queue().get_stats().await?;
    assert_eq!(stats.processing, 3);
    assert_eq!(stats.queued, 3);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_priority_order_and_transitions() -> Result<(), Box<dyn Error>> {
    let (system, clock) = start_idle(|_| {}).await?;
    let queue = system.queue();

    let low = queue
        .enqueue(common::preview("low").with_priority(Priority::Low))
        .await?;
    let high = queue
        .enqueue(common::preview("high").with_priority(Priority::High))
        .await?;

    let queued: Vec<_> = queue.get_queued().await?.into_iter().map(|j| j.id).collect();
    assert_eq!(queued, vec![high.id, low.id]);

    let claimed = queue.process_next().await?.ok_or("nothing claimed")?;
    assert_eq!(claimed.id, high.id);

    let progressed = queue.update_progress(high.id, 40).await?;
    assert_eq!(progressed.progress, 40);

    clock.advance_secs(3);
    let failed = queue
        .update_status(
            high.id,
            StatusUpdate::Failed(JobError::new(ErrorCode::ProviderTimeout, "slow")),
        )
        .await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.completed_at.is_some());

    // terminal jobs stay terminal
    let again = queue.update_status(high.id, StatusUpdate::Processing).await;
    assert!(matches!(
        again,
        Err(ActorError::Transition(TransitionError::InvalidTransition { .. }))
    ));

    // progress on a queued job is refused
    let progress = queue.update_progress(low.id, 10).await;
    assert!(matches!(
        progress,
        Err(ActorError::Transition(TransitionError::NotProcessing { .. }))
    ));

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_tracker_idempotency_and_stats() -> Result<(), Box<dyn Error>> {
    let (system, clock) = start_idle(|config| config.tracker.idempotency_ttl_secs = 100).await?;
    let tracker = system.tracker();

    let first = system.queue().enqueue(common::preview("one")).await?;
    let second = system.queue().enqueue(common::preview("two")).await?;

    assert!(tracker.set_idempotency_key("key-1", first.id).await?);
    assert!(!tracker.set_idempotency_key("key-1", second.id).await?);
    assert_eq!(
        tracker.get_job_by_idempotency_key("key-1").await?,
        Some(first.id)
    );

    clock.advance_secs(101);
    assert_eq!(tracker.get_job_by_idempotency_key("key-1").await?, None);
    assert!(!tracker.has_idempotency_key("key-1").await?);

    tracker.add_job_to_request("req-9", first.id).await?;
    tracker.add_job_to_request("req-9", first.id).await?;
    tracker.add_job_to_request("req-9", second.id).await?;
    assert_eq!(tracker.get_request_job_count("req-9").await?, 2);

    let third = system.queue().enqueue(common::preview("three")).await?;
    for job in [first.id, second.id] {
        tracker
            .record_transition(job, JobStatus::Queued, JobStatus::Processing)
            .await?;
        tracker
            .record_transition(job, JobStatus::Processing, JobStatus::Completed)
            .await?;
    }
    tracker
        .record_transition(third.id, JobStatus::Processing, JobStatus::Failed)
        .await?;
    tracker
        .record_transition(third.id, JobStatus::Queued, JobStatus::Processing)
        .await?;

    let stats = tracker.get_global_stats().await?;
    assert_eq!(stats.total_jobs, 3);
    assert_eq!(stats.completed_jobs, 2);
    assert_eq!(stats.failed_jobs, 1);
    assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);

    let history = tracker.get_job_history(first.id).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to, JobStatus::Completed);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_client_rate_window() -> Result<(), Box<dyn Error>> {
    let (system, clock) = start_idle(|_| {}).await?;
    let tracker = system.tracker();

    let start = clock.now();
    tracker.record_request("client-a").await?;
    clock.advance_secs(10);
    tracker.record_request("client-a").await?;

    assert_eq!(tracker.get_request_count("client-a", 60).await?, 2);
    assert_eq!(
        tracker.get_next_available_slot("client-a", 2, 60).await?,
        start + chrono::TimeDelta::seconds(60)
    );
    assert_eq!(
        tracker.get_next_available_slot("client-a", 5, 60).await?,
        clock.now()
    );

    clock.advance_secs(55);
    assert_eq!(tracker.get_request_count("client-a", 60).await?, 1);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_queued_job() -> Result<(), Box<dyn Error>> {
    let (system, _clock) = start_idle(|_| {}).await?;

    let job = system.queue().enqueue(common::preview("never runs")).await?;
    assert!(system.cancel_job(job.id).await?);

    let cancelled = system.queue().get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(cancelled.status, JobStatus::Failed);
    let error = cancelled.error.ok_or("no error recorded")?;
    assert_eq!(error.code, ErrorCode::Cancelled);

    let history = system.tracker().get_job_history(job.id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from, JobStatus::Queued);
    assert_eq!(history[0].to, JobStatus::Failed);

    // already terminal
    assert!(!system.cancel_job(job.id).await?);
    assert_eq!(system.queue().get_queued().await?.len(), 0);

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_clean_old_jobs_keeps_unfinished() -> Result<(), Box<dyn Error>> {
    let (system, clock) = start_idle(|_| {}).await?;
    let queue = system.queue();

    let done = queue.enqueue(common::preview("done")).await?;
    let waiting = queue.enqueue(common::preview("waiting")).await?;
    queue.process_next().await?;
    queue
        .update_status(
            done.id,
            StatusUpdate::Completed(preview_core::JobResult::video("https://cdn.test/a.mp4")),
        )
        .await?;

    clock.advance_secs(120);
    assert_eq!(queue.clean_old_jobs(60).await?, 1);
    assert!(queue.get_job(done.id).await?.is_none());
    assert!(queue.get_job(waiting.id).await?.is_some());

    queue.clear().await?;
    assert_eq!(queue.get_stats().await?.total, 0);

    system.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submits_share_one_job() -> Result<(), Box<dyn Error>> {
    let (system, _clock) = start_idle(|_| {}).await?;

    let submits = (0..8).map(|_| {
        system.submit(
            common::preview("double click")
                .with_idempotency_key("idem-race")
                .with_request_id("req-race"),
        )
    });
    let submissions = join_all(submits)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let fresh: Vec<_> = submissions.iter().filter(|s| !s.duplicate).collect();
    assert_eq!(fresh.len(), 1);
    let job_id = fresh[0].job.id;
    assert!(submissions.iter().all(|s| s.job.id == job_id));

    assert_eq!(system.queue().get_stats().await?.total, 1);
    assert_eq!(
        system.tracker().get_job_by_idempotency_key("idem-race").await?,
        Some(job_id)
    );
    assert_eq!(
        system.tracker().get_jobs_by_request_id("req-race").await?,
        vec![job_id]
    );

    system.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_key_of_cleaned_job_admits_new_job() -> Result<(), Box<dyn Error>> {
    let (system, clock) = start_idle(|_| {}).await?;
    let request = || common::preview("try again later").with_idempotency_key("idem-stale");

    let first = system.submit(request()).await?;
    assert!(system.cancel_job(first.job.id).await?);
    clock.advance_secs(700);
    assert_eq!(system.queue().clean_old_jobs(600).await?, 1);
    // the key itself is still inside its ttl
    assert_eq!(
        system.tracker().get_job_by_idempotency_key("idem-stale").await?,
        Some(first.job.id)
    );

    let second = system.submit(request()).await?;
    assert!(!second.duplicate);
    assert_ne!(second.job.id, first.job.id);
    assert_eq!(second.job.status, JobStatus::Queued);

    let third = system.submit(request()).await?;
    assert!(third.duplicate);
    assert_eq!(third.job.id, second.job.id);
    assert_eq!(
        system.tracker().get_job_by_idempotency_key("idem-stale").await?,
        Some(second.job.id)
    );
    assert_eq!(system.queue().get_stats().await?.total, 1);

    system.shutdown().await;
    Ok(())
}
