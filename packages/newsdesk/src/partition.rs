//! Deterministic split of the crawl site list across independent workers.
//!
//! Every scheduler process computes its own share from `(sites, worker_id,
//! total_workers)` alone. No coordination, no shared state: the same inputs
//! always yield the same contiguous slice.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A news site crawled on a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Site {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Position of this process within the scheduler pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    worker_id: usize,
    total_workers: usize,
}

impl WorkerIdentity {
    pub fn new(worker_id: usize, total_workers: usize) -> Result<Self, ConfigError> {
        if total_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if worker_id >= total_workers {
            return Err(ConfigError::WorkerOutOfRange {
                worker_id,
                total_workers,
            });
        }
        Ok(Self {
            worker_id,
            total_workers,
        })
    }

    /// The only worker of a single-process deployment.
    pub fn solo() -> Self {
        Self {
            worker_id: 0,
            total_workers: 1,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn total_workers(&self) -> usize {
        self.total_workers
    }
}

/// The contiguous slice `sites[start..end]` assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerShare {
    pub identity: WorkerIdentity,
    pub start: usize,
    pub end: usize,
    pub sites: Vec<Site>,
}

impl WorkerShare {
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }
}

/// Slice `sites` for `identity`.
///
/// `share_size = ceil(len / total_workers)`, `start = worker_id * share_size`,
/// `end = min(start + share_size, len)`. Trailing workers may get an empty
/// share when the list is short.
pub fn partition(sites: &[Site], identity: WorkerIdentity) -> WorkerShare {
    let len = sites.len();
    let share_size = len.div_ceil(identity.total_workers);
    let start = (identity.worker_id * share_size).min(len);
    let end = (start + share_size).min(len);

    WorkerShare {
        identity,
        start,
        end,
        sites: sites[start..end].to_vec(),
    }
}

/// Validate raw ids and slice in one step.
pub fn partition_for(
    sites: &[Site],
    worker_id: usize,
    total_workers: usize,
) -> Result<WorkerShare, ConfigError> {
    Ok(partition(sites, WorkerIdentity::new(worker_id, total_workers)?))
}

/// Spread scheduler start times evenly across one interval.
pub fn stagger_offset(interval: Duration, identity: WorkerIdentity) -> Duration {
    interval.mul_f64(identity.worker_id as f64 / identity.total_workers as f64)
}
