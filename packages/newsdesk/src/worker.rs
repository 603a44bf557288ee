//! Worker loop: claim one job, run the pipeline, write the terminal state.
//!
//! The loop is the only writer of a job's ledger entry while it holds the
//! lease. Parallelism across jobs comes from running more worker processes,
//! never from claiming several jobs in one loop.
//!
//! # Lifecycle
//!
//! ```text
//! WorkerLoop::run
//!     │
//!     ├─► shutdown requested?        ─► WorkerExit::Shutdown
//!     ├─► processed max_jobs?        ─► WorkerExit::Recycle
//!     ├─► RSS above ceiling?         ─► WorkerExit::MemoryCeiling
//!     ├─► claim (lease)
//!     │     └─ none: requeue expired, purge old results,
//!     │              replay parked callbacks, sleep
//!     ├─► PipelineCoordinator::run   (heartbeat task extends the lease)
//!     └─► complete(SUCCESS | FAILURE), discarded if the lease was lost
//! ```
//!
//! The surrounding supervisor restarts the process after `Recycle` and
//! `MemoryCeiling`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::pipeline::coordinator::PipelineCoordinator;
use crate::pipeline::progress::LedgerReporter;
use crate::traits::ledger::JobLedger;
use crate::types::job::{JobId, JobOutcome, JobRecord};

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease holder name written to the ledger
    pub worker_id: String,
    /// How long to wait when no job is available
    pub poll_interval: Duration,
    /// Lease granted per claim and per heartbeat
    pub lease: Duration,
    /// How often the running job's lease is extended
    pub heartbeat_interval: Duration,
    /// Jobs processed before the loop exits to be replaced
    pub max_jobs: usize,
    /// Resident memory above which the loop exits before its next claim
    pub memory_ceiling_bytes: u64,
    /// How long terminal results stay in the ledger
    pub result_ttl: Duration,
    /// Minimum gap between replays of the callback spool
    pub redelivery_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(2),
            lease: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(60),
            max_jobs: 50,
            memory_ceiling_bytes: 1500 * 1024 * 1024,
            result_ttl: Duration::from_secs(3600),
            redelivery_interval: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    /// Processed the configured number of jobs
    Recycle { jobs: usize },
    /// Resident memory exceeded the configured ceiling
    MemoryCeiling { rss_bytes: u64 },
}

impl WorkerExit {
    /// Process exit code. Non-zero exits ask the supervisor for a fresh
    /// replacement.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerExit::Shutdown => 0,
            WorkerExit::Recycle { .. } => 3,
            WorkerExit::MemoryCeiling { .. } => 4,
        }
    }
}

/// Reports the current process's resident set size.
pub trait MemoryProbe: Send + Sync {
    /// `None` when the platform offers no reading.
    fn rss_bytes(&self) -> Option<u64>;
}

/// Reads resident pages from `/proc/self/statm` (Linux).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatmProbe;

const PAGE_SIZE: u64 = 4096;

impl MemoryProbe for ProcStatmProbe {
    fn rss_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident * PAGE_SIZE)
    }
}

/// Pulls jobs from the ledger one at a time and runs them to completion.
pub struct WorkerLoop {
    ledger: Arc<dyn JobLedger>,
    coordinator: Arc<PipelineCoordinator>,
    probe: Arc<dyn MemoryProbe>,
    config: WorkerConfig,
    last_redelivery: Mutex<Option<Instant>>,
}

impl WorkerLoop {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        coordinator: Arc<PipelineCoordinator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            ledger,
            coordinator,
            probe: Arc::new(ProcStatmProbe),
            config,
            last_redelivery: Mutex::new(None),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until shutdown, recycle, or the memory ceiling.
    ///
    /// Shutdown stops claiming; a job already in flight runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerExit {
        info!(
            worker_id = %self.config.worker_id,
            max_jobs = self.config.max_jobs,
            memory_ceiling_mb = self.config.memory_ceiling_bytes / (1024 * 1024),
            "worker loop starting"
        );

        let mut processed = 0;

        let exit = loop {
            if shutdown.is_cancelled() {
                break WorkerExit::Shutdown;
            }

            if processed >= self.config.max_jobs {
                break WorkerExit::Recycle { jobs: processed };
            }

            if let Some(rss_bytes) = self.probe.rss_bytes() {
                if rss_bytes > self.config.memory_ceiling_bytes {
                    break WorkerExit::MemoryCeiling { rss_bytes };
                }
            }

            let record = match self
                .ledger
                .claim(&self.config.worker_id, self.config.lease)
                .await
            {
                Ok(record) => record,
                Err(e) => {
                    error!(error = %e, "failed to claim job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break WorkerExit::Shutdown,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }
            };

            let Some(record) = record else {
                self.housekeeping().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break WorkerExit::Shutdown,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            };

            self.process(record).await;
            processed += 1;
        };

        info!(worker_id = %self.config.worker_id, exit = ?exit, processed, "worker loop stopped");
        exit
    }

    /// Run one claimed job and record its outcome.
    async fn process(&self, record: JobRecord) {
        let job = record.job;
        info!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = record.attempts,
            worker_id = %self.config.worker_id,
            "job claimed"
        );

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = self.spawn_heartbeat(job.id, heartbeat_stop.clone());

        let reporter = LedgerReporter::new(self.ledger.clone(), job.id, self.config.worker_id.clone());
        let outcome = match self.coordinator.run(&job, &reporter).await {
            Ok(result) => JobOutcome::Success(result),
            Err(e) => JobOutcome::Failure(e.to_string()),
        };

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            warn!(job_id = %job.id, error = %e, "heartbeat task failed");
        }

        self.finish(job.id, &outcome).await;
    }

    /// Terminal write. A worker that lost its lease drops its result.
    async fn finish(&self, job_id: JobId, outcome: &JobOutcome) {
        match self
            .ledger
            .complete(job_id, &self.config.worker_id, outcome)
            .await
        {
            Ok(()) => info!(job_id = %job_id, state = %outcome.state(), "job finished"),
            Err(e @ (StoreError::LeaseLost { .. } | StoreError::AlreadyTerminal(_))) => {
                warn!(job_id = %job_id, error = %e, "lease lost, discarding result");
            }
            Err(e) => error!(job_id = %job_id, error = %e, "failed to record job outcome"),
        }
    }

    fn spawn_heartbeat(
        &self,
        job_id: JobId,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let ledger = self.ledger.clone();
        let worker_id = self.config.worker_id.clone();
        let lease = self.config.lease;
        let every = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        match ledger.heartbeat(job_id, &worker_id, lease).await {
                            Ok(()) => debug!(job_id = %job_id, "lease extended"),
                            Err(e @ (StoreError::LeaseLost { .. } | StoreError::AlreadyTerminal(_))) => {
                                warn!(job_id = %job_id, error = %e, "lease lost, stopping heartbeat");
                                break;
                            }
                            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                        }
                    }
                }
            }
        })
    }

    /// Idle-time maintenance: recover abandoned jobs, expire old results,
    /// and replay parked callbacks.
    async fn housekeeping(&self) {
        self.redeliver_parked().await;

        match self.ledger.requeue_expired().await {
            Ok(0) => {}
            Ok(n) => info!(count = n, "requeued jobs with expired leases"),
            Err(e) => warn!(error = %e, "failed to requeue expired jobs"),
        }

        let Some(cutoff) = chrono::Duration::from_std(self.config.result_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return;
        };
        match self.ledger.purge_finished(cutoff).await {
            Ok(0) => {}
            Ok(n) => debug!(count = n, "purged expired job results"),
            Err(e) => warn!(error = %e, "failed to purge expired results"),
        }
    }

    /// Replay the callback spool at most once per `redelivery_interval`.
    async fn redeliver_parked(&self) {
        let mut last = self.last_redelivery.lock().await;
        if last.is_some_and(|at| at.elapsed() < self.config.redelivery_interval) {
            return;
        }
        *last = Some(Instant::now());

        match self.coordinator.redeliver_parked().await {
            Ok(report) if report.delivered + report.failed == 0 => {}
            Ok(report) => info!(
                delivered = report.delivered,
                failed = report.failed,
                "replayed parked callbacks"
            ),
            Err(e) => warn!(error = %e, "failed to replay parked callbacks"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::coordinator::Collaborators;
    use crate::stores::MemoryStore;
    use crate::testing::{
        article_segment, FixedMemoryProbe, MemoryObjectStore, MockAnalyzer, MockCallbackSink,
        MockConverter, MockSegmenter,
    };
    use crate::types::config::PipelineConfig;
    use crate::types::job::{Job, JobKind, JobParams, JobState};

    fn coordinator(store: Arc<MemoryStore>) -> Arc<PipelineCoordinator> {
        let objects = MemoryObjectStore::new().with_object("in/front.jpg", vec![1u8, 2, 3]);
        let stages = Collaborators {
            converter: Arc::new(MockConverter::new(1)),
            segmenter: Arc::new(MockSegmenter::new().with_default(vec![article_segment("a")])),
            analyzer: Arc::new(MockAnalyzer::new()),
            objects: Arc::new(objects),
            sink: Arc::new(MockCallbackSink::new()),
        };
        Arc::new(PipelineCoordinator::new(
            stages,
            store,
            PipelineConfig::default().without_backoff(),
        ))
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::with_worker_id("test-worker")
        }
    }

    fn image_job() -> Job {
        Job::builder()
            .kind(JobKind::SingleImage)
            .input_ref("in/front.jpg")
            .params(JobParams::new().with_language("en"))
            .build()
    }

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_jobs, 50);
        assert_eq!(config.lease, Duration::from_secs(300));
        assert_eq!(config.memory_ceiling_bytes, 1500 * 1024 * 1024);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = WorkerConfig::with_worker_id("my-worker");
        assert_eq!(config.worker_id, "my-worker");
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            WorkerExit::Shutdown.exit_code(),
            WorkerExit::Recycle { jobs: 1 }.exit_code(),
            WorkerExit::MemoryCeiling { rss_bytes: 1 }.exit_code(),
        ];
        assert_eq!(codes, [0, 3, 4]);
    }

    #[test]
    fn test_statm_probe_reads_on_linux() {
        if cfg!(target_os = "linux") {
            assert!(ProcStatmProbe.rss_bytes().is_some_and(|rss| rss > 0));
        }
    }

    #[tokio::test]
    async fn test_recycles_after_max_jobs() {
        let store = Arc::new(MemoryStore::new());
        let first = image_job();
        let second = image_job();
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let worker = WorkerLoop::new(
            store.clone(),
            coordinator(store.clone()),
            WorkerConfig {
                max_jobs: 1,
                ..test_config()
            },
        )
        .with_memory_probe(Arc::new(FixedMemoryProbe::new(0)));

        let exit = worker.run(CancellationToken::new()).await;
        assert_eq!(exit, WorkerExit::Recycle { jobs: 1 });

        let states = [
            store.get(first.id).await.unwrap().unwrap().state,
            store.get(second.id).await.unwrap().unwrap().state,
        ];
        assert!(states.contains(&JobState::Success));
        assert!(states.contains(&JobState::Pending));
    }

    #[tokio::test]
    async fn test_memory_ceiling_stops_before_claim() {
        let store = Arc::new(MemoryStore::new());
        let job = image_job();
        store.insert(&job).await.unwrap();

        let worker = WorkerLoop::new(store.clone(), coordinator(store.clone()), test_config())
            .with_memory_probe(Arc::new(FixedMemoryProbe::new(u64::MAX)));

        let exit = worker.run(CancellationToken::new()).await;
        assert_eq!(exit, WorkerExit::MemoryCeiling { rss_bytes: u64::MAX });
        assert_eq!(store.get(job.id).await.unwrap().unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_shutdown_while_idle() {
        let store = Arc::new(MemoryStore::new());
        let worker = WorkerLoop::new(store.clone(), coordinator(store), test_config())
            .with_memory_probe(Arc::new(FixedMemoryProbe::new(0)));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        assert_eq!(worker.run(shutdown).await, WorkerExit::Shutdown);
    }

    #[tokio::test]
    async fn test_result_discarded_after_lease_lost() {
        let store = Arc::new(MemoryStore::new());
        let job = image_job();
        store.insert(&job).await.unwrap();

        // Another worker holds the job
        store.claim("other-worker", Duration::from_secs(60)).await.unwrap();

        let worker = WorkerLoop::new(store.clone(), coordinator(store.clone()), test_config());
        worker
            .finish(job.id, &JobOutcome::Failure("stale".into()))
            .await;

        let record = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Started);
        assert_eq!(record.worker_id.as_deref(), Some("other-worker"));
    }

    #[tokio::test]
    async fn test_spool_replay_is_throttled() {
        use crate::traits::spool::RetrySpool;

        let store = Arc::new(MemoryStore::new());
        let worker = WorkerLoop::new(
            store.clone(),
            coordinator(store.clone()),
            WorkerConfig {
                redelivery_interval: Duration::from_secs(3600),
                ..test_config()
            },
        );

        store
            .park("http://gw/results", serde_json::json!({"n": 1}), "503")
            .await
            .unwrap();
        worker.housekeeping().await;
        assert_eq!(store.spool_count(), 0);

        store
            .park("http://gw/results", serde_json::json!({"n": 2}), "503")
            .await
            .unwrap();
        worker.housekeeping().await;
        assert_eq!(store.spool_count(), 1);
    }
}
