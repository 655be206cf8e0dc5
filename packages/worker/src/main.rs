use std::process::ExitCode;
use std::time::Duration;

use preview_actors::JobSystem;
use preview_core::{EnqueueRequest, PreviewPayload, SystemConfig};
use tracing_subscriber::EnvFilter;

mod simulator;

use simulator::SimulatedExecutor;

/// How often queue stats are logged while running.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match SystemConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let delay = Duration::from_millis(env_u64("PREVIEW_SIM_DELAY_MS").unwrap_or(2000));
    let fail_every = env_u64("PREVIEW_SIM_FAIL_EVERY").unwrap_or(0);
    let system = match JobSystem::start(config, SimulatedExecutor::new(delay, fail_every)).await {
        Ok(system) => system,
        Err(e) => {
            tracing::error!("Failed to start job system: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for i in 0..env_u64("PREVIEW_DEMO_JOBS").unwrap_or(0) {
        let request = EnqueueRequest::new(PreviewPayload::new(
            format!("demo-{}", i),
            "a paper boat drifting down a rainy street",
        ))
        .with_idempotency_key(format!("demo-{}", i));
        match system.submit(request).await {
            Ok(submission) => tracing::info!("Submitted demo job {}", submission.job.id),
            Err(e) => tracing::warn!("Demo job {} rejected: {}", i, e),
        }
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = stats_interval.tick() => {
                match system.queue().get_stats().await {
                    Ok(stats) => tracing::info!(
                        "Queue: {} queued, {} processing, {} completed, {} failed",
                        stats.queued,
                        stats.processing,
                        stats.completed,
                        stats.failed
                    ),
                    Err(e) => tracing::warn!("Failed to read queue stats: {}", e),
                }
            }
        }
    }

    system.shutdown().await;
    ExitCode::SUCCESS
}

fn env_u64(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a number", name, value);
            None
        }
    }
}
