use crate::pipeline::Pipeline;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Interval of the advisory stuck-evaluation scan
const STUCK_SCAN_INTERVAL: Duration = Duration::from_secs(300);

/// Initialize and start the scheduler
pub async fn start_scheduler(pipeline: Arc<Pipeline>, sync_schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    info!("Scheduling key sync (cron: {})", sync_schedule);
    let sync_pipeline = Arc::clone(&pipeline);
    let sync_job = Job::new_async(sync_schedule, move |_uuid, _l| {
        let pipeline = Arc::clone(&sync_pipeline);

        Box::pin(async move {
            info!("Scheduled key sync triggered");
            if let Err(e) = run_sync_job(&pipeline).await {
                error!("Scheduled key sync failed: {}", e);
            }
        })
    })?;
    scheduler.add(sync_job).await?;

    let scan_pipeline = Arc::clone(&pipeline);
    let scan_job = Job::new_repeated_async(STUCK_SCAN_INTERVAL, move |_uuid, _l| {
        let pipeline = Arc::clone(&scan_pipeline);

        Box::pin(async move {
            if let Err(e) = run_stuck_scan(&pipeline).await {
                error!("Stuck evaluation scan failed: {}", e);
            }
        })
    })?;
    scheduler.add(scan_job).await?;

    scheduler.start().await?;
    info!("Scheduler started");

    Ok(scheduler)
}

/// Create missing rows for every enabled language
pub async fn run_sync_job(pipeline: &Pipeline) -> Result<()> {
    let report = pipeline.sync.sync().await?;
    if !report.failed_languages.is_empty() {
        warn!(languages = ?report.failed_languages, "Key sync incomplete");
    }
    Ok(())
}

/// Log stuck evaluations. Resetting them is left to an operator.
/// Returns the number of stuck runs found.
pub async fn run_stuck_scan(pipeline: &Pipeline) -> Result<usize> {
    let stuck = pipeline.tracker.detect_stuck().await?;
    for job in &stuck {
        warn!(
            language = %job.language,
            evaluated_keys = job.evaluated_keys,
            total_keys = job.total_keys,
            silent_for_secs = job.silent_for_secs,
            "Evaluation appears stuck; reset it via POST /progress/reset-stuck"
        );
    }
    Ok(stuck.len())
}
