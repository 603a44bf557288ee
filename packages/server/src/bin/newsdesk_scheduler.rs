//! Crawl scheduler for one worker identity.
//!
//! Each process crawls a deterministic slice of the site list, so running
//! `TOTAL_WORKERS` copies with distinct `WORKER_ID`s covers every site
//! exactly once per interval without any coordination between them.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use newsdesk::{partition, CrawlCycle};
use newsdesk_server::kernel::{load_sites, start_crawl_scheduler, ServerDeps};
use newsdesk_server::telemetry::init_tracing;
use newsdesk_server::Config;

#[derive(Parser)]
#[command(name = "newsdesk-scheduler")]
#[command(about = "Crawl this worker's share of news sites on a schedule")]
struct Cli {
    /// Position in the scheduler pool (overrides WORKER_ID)
    #[arg(long)]
    worker_id: Option<usize>,

    /// Pool size (overrides TOTAL_WORKERS)
    #[arg(long)]
    total_workers: Option<usize>,

    /// Seconds between cycles (overrides CRAWL_INTERVAL_SECS)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Cap on sites crawled per cycle
    #[arg(long)]
    max_sites: Option<usize>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(id) = cli.worker_id {
        config.worker_id = id;
    }
    if let Some(total) = cli.total_workers {
        config.total_workers = total;
    }
    if let Some(secs) = cli.interval_secs {
        config.crawl_interval_secs = secs;
    }

    let identity = config.identity()?;
    let mut scheduler_config = config.scheduler()?;
    if let Some(max_sites) = cli.max_sites {
        scheduler_config = scheduler_config.with_max_sites(max_sites);
    }

    let sites = load_sites(&config.sites_file).await?;
    let share = partition(&sites, identity);
    tracing::info!(
        worker_id = identity.worker_id(),
        total_workers = identity.total_workers(),
        start = share.start,
        end = share.end,
        total_sites = sites.len(),
        "Computed crawl share"
    );

    let deps = ServerDeps::from_config(&config).await?;
    let cycle = Arc::new(CrawlCycle::new(
        deps.site_feed(&config)?,
        deps.sink.clone(),
        deps.stores.spool.clone(),
        share,
        scheduler_config,
    ));

    if cli.once {
        let report = cycle.run().await.context("Crawl cycle failed")?;
        tracing::info!(?report, "Single crawl cycle finished");
        return Ok(());
    }

    let mut scheduler = tokio::select! {
        started = start_crawl_scheduler(cycle) => started?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested before the first tick");
            return Ok(());
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, stopping scheduler");

    scheduler.shutdown().await?;
    Ok(())
}
