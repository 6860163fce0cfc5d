//! Scheduled jobs and task submitters that live outside the scanner and
//! worker modules

pub mod analyze;
pub mod scanner;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::scanner::ScanService;
use crate::tasks::TaskRegistry;

pub use analyze::submit_analysis;

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    scan_schedule: &str,
    scans: ScanService,
    registry: TaskRegistry,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Library scan, hourly by default
    let scan_job = Job::new_async(scan_schedule, move |_uuid, _l| {
        let scans = scans.clone();
        let registry = registry.clone();
        Box::pin(async move {
            info!("Running scheduled library scan");
            scanner::run_scheduled_scan(&scans, &registry);
        })
    })?;
    scheduler.add(scan_job).await?;

    scheduler.start().await?;

    info!(schedule = scan_schedule, "Job scheduler started");
    Ok(scheduler)
}
