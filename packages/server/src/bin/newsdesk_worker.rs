//! Worker process: claims jobs from the ledger and runs the pipeline until
//! shutdown, recycle, or the memory ceiling.
//!
//! The exit code tells the supervisor why the process stopped:
//! 0 = shutdown, 3 = recycled after max jobs, 4 = memory ceiling.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use newsdesk::{PipelineCoordinator, WorkerLoop};
use newsdesk_server::kernel::ServerDeps;
use newsdesk_server::telemetry::init_tracing;
use newsdesk_server::Config;

#[derive(Parser)]
#[command(name = "newsdesk-worker")]
#[command(about = "Process queued newsdesk jobs")]
struct Cli {
    /// Lease holder id (default: random per process)
    #[arg(long)]
    name: Option<String>,

    /// Jobs to process before exiting for a fresh process
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Concurrent pages per job
    #[arg(long)]
    page_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(max_jobs) = cli.max_jobs {
        config.max_jobs_per_worker = max_jobs;
    }
    if let Some(width) = cli.page_concurrency {
        config.page_concurrency = width;
    }

    let deps = ServerDeps::from_config(&config).await?;
    let collaborators = deps.collaborators(&config)?;
    let coordinator = Arc::new(PipelineCoordinator::new(
        collaborators,
        deps.stores.spool.clone(),
        config.pipeline(),
    ));

    let worker_config = match cli.name {
        Some(name) => config.worker(name),
        None => config.worker(format!("worker-{}", uuid::Uuid::new_v4())),
    };
    tracing::info!(worker_id = %worker_config.worker_id, "Starting newsdesk worker");

    let worker = WorkerLoop::new(deps.stores.ledger.clone(), coordinator, worker_config);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing in-flight job");
            signal.cancel();
        }
    });

    let exit = worker.run(shutdown).await;
    tracing::info!(?exit, "Worker stopped");
    std::process::exit(exit.exit_code());
}
