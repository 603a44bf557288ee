//! Progress reporting from a running pipeline back to the job ledger.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::traits::ledger::JobLedger;
use crate::types::job::{JobId, Progress};

/// Receives stage-boundary progress and retry excursions for one job.
///
/// Reporting is best effort: a failed write never fails the job.
#[async_trait]
pub trait JobReporter: Send + Sync {
    async fn progress(&self, progress: Progress);

    /// A stage failed transiently and will be retried after a backoff.
    async fn retrying(&self, attempt: u32, error: &str);

    /// The next attempt of a retried stage is starting.
    async fn resumed(&self);
}

/// Discards every report.
pub struct NoopReporter;

#[async_trait]
impl JobReporter for NoopReporter {
    async fn progress(&self, _progress: Progress) {}

    async fn retrying(&self, _attempt: u32, _error: &str) {}

    async fn resumed(&self) {}
}

/// Writes reports to the ledger under the owning worker's lease.
pub struct LedgerReporter {
    ledger: Arc<dyn JobLedger>,
    job_id: JobId,
    worker_id: String,
}

impl LedgerReporter {
    pub fn new(ledger: Arc<dyn JobLedger>, job_id: JobId, worker_id: impl Into<String>) -> Self {
        Self {
            ledger,
            job_id,
            worker_id: worker_id.into(),
        }
    }
}

#[async_trait]
impl JobReporter for LedgerReporter {
    async fn progress(&self, progress: Progress) {
        if let Err(e) = self
            .ledger
            .update_progress(self.job_id, &self.worker_id, &progress)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "failed to record progress");
        }
    }

    async fn retrying(&self, attempt: u32, error: &str) {
        if let Err(e) = self
            .ledger
            .mark_retry(self.job_id, &self.worker_id, attempt, error)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "failed to record retry");
        }
    }

    async fn resumed(&self) {
        if let Err(e) = self.ledger.resume(self.job_id, &self.worker_id).await {
            warn!(job_id = %self.job_id, error = %e, "failed to record resume");
        }
    }
}
