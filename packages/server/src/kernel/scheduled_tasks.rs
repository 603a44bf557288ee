//! Periodic crawl cycles using tokio-cron-scheduler.
//!
//! ```text
//! start_crawl_scheduler
//!     ├─► (run_on_startup) after worker_id * startup_delay → one cycle
//!     └─► after stagger offset → every interval
//!             └─► CrawlCycle::run()  (skipped while the previous one runs)
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use newsdesk::{stagger_offset, CrawlCycle, CycleReport};

/// Start the repeating crawl for this worker's share.
///
/// Returns once the scheduler is running. The stagger offset is waited
/// out before the first tick is scheduled.
pub async fn start_crawl_scheduler(cycle: Arc<CrawlCycle>) -> Result<JobScheduler> {
    let identity = cycle.share().identity;
    let config = cycle.config().clone();
    let running = Arc::new(Mutex::new(()));

    if config.run_on_startup {
        let worker_slot = u32::try_from(identity.worker_id()).unwrap_or(u32::MAX);
        let delay = config.startup_delay.saturating_mul(worker_slot);
        let startup_cycle = cycle.clone();
        let startup_guard = running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!("Running startup crawl cycle");
            run_guarded(&startup_cycle, &startup_guard).await;
        });
    }

    let offset = stagger_offset(config.interval, identity);
    tracing::info!(
        worker_id = identity.worker_id(),
        total_workers = identity.total_workers(),
        sites = cycle.share().len(),
        offset_secs = offset.as_secs(),
        "Waiting for stagger offset before scheduling crawls"
    );
    tokio::time::sleep(offset).await;

    let scheduler = JobScheduler::new().await?;

    let tick_cycle = cycle.clone();
    let tick_guard = running.clone();
    let crawl_job = Job::new_repeated_async(config.interval, move |_uuid, _lock| {
        let cycle = tick_cycle.clone();
        let guard = tick_guard.clone();
        Box::pin(async move {
            run_guarded(&cycle, &guard).await;
        })
    })?;

    scheduler.add(crawl_job).await?;
    scheduler.start().await?;

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Crawl scheduler started"
    );
    Ok(scheduler)
}

/// Run one cycle unless another is still in progress.
async fn run_guarded(cycle: &CrawlCycle, running: &Mutex<()>) -> Option<CycleReport> {
    let Ok(_held) = running.try_lock() else {
        tracing::warn!("Previous crawl cycle still running, skipping this tick");
        return None;
    };

    match cycle.run().await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!("Crawl cycle failed: {}", e);
            None
        }
    }
}
