//! Job ledger trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::job::{Job, JobId, JobOutcome, JobRecord, Progress};

/// Durable record of job id -> state + result, shared by the dispatcher and
/// every worker.
///
/// Pending rows double as the durable queue: `claim` is message delivery,
/// and the lease is the visibility timeout. A job whose owner stops
/// heartbeating becomes claimable again once its lease expires, so a crashed
/// worker never strands a job in STARTED.
///
/// All owner-side writes are fenced on `worker_id`. A worker that lost its
/// lease gets `StoreError::LeaseLost` and must discard its work.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Admit a job in PENDING.
    async fn insert(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Claim the oldest job that is PENDING, or live with an expired lease.
    ///
    /// The claimed row moves to STARTED under `worker_id` until `now + lease`.
    /// Concurrent claimers never receive the same job.
    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<JobRecord>>;

    /// Extend the lease on a job this worker owns.
    async fn heartbeat(&self, id: JobId, worker_id: &str, lease: Duration) -> Result<()>;

    async fn update_progress(&self, id: JobId, worker_id: &str, progress: &Progress)
        -> Result<()>;

    /// STARTED -> RETRY while a transiently failing stage backs off.
    async fn mark_retry(&self, id: JobId, worker_id: &str, attempt: u32, error: &str)
        -> Result<()>;

    /// RETRY -> STARTED when the next attempt begins.
    async fn resume(&self, id: JobId, worker_id: &str) -> Result<()>;

    /// Terminal write. Fails with `AlreadyTerminal` if the job already
    /// finished.
    async fn complete(&self, id: JobId, worker_id: &str, outcome: &JobOutcome) -> Result<()>;

    /// Move live jobs with expired leases back to PENDING. Returns the count.
    async fn requeue_expired(&self) -> Result<usize>;

    /// Delete terminal jobs that finished before `cutoff`. Returns the count.
    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
