//! In-memory ledger and spool for tests and single-process development.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::stores::lease_deadline;
use crate::traits::{ledger::JobLedger, spool::RetrySpool};
use crate::types::job::{Job, JobId, JobOutcome, JobRecord, JobState, Progress};
use crate::types::spool::RetryItem;

/// In-memory job ledger and retry spool.
///
/// Useful for testing and development. Not suitable for production:
/// nothing survives a restart, and nothing is shared across processes.
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    spool: RwLock<SpoolState>,
}

#[derive(Default)]
struct SpoolState {
    next_seq: i64,
    items: BTreeMap<i64, ParkedItem>,
}

struct ParkedItem {
    item: RetryItem,
    claim_expires_at: Option<DateTime<Utc>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            spool: RwLock::new(SpoolState::default()),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn spool_count(&self) -> usize {
        self.spool.read().unwrap().items.len()
    }
}

/// Borrow a live job owned by `worker_id`, or explain why not.
fn owned<'a>(
    jobs: &'a mut HashMap<JobId, JobRecord>,
    id: JobId,
    worker_id: &str,
) -> Result<&'a mut JobRecord> {
    let record = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
    if record.state.is_terminal() {
        return Err(StoreError::AlreadyTerminal(id));
    }
    if !record.is_owned_by(worker_id) {
        return Err(StoreError::LeaseLost {
            job_id: id,
            worker_id: worker_id.to_string(),
        });
    }
    Ok(record)
}

#[async_trait]
impl JobLedger for MemoryStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .unwrap()
            .insert(job.id, JobRecord::pending(job.clone()));
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();

        let next = jobs
            .values()
            .filter(|r| r.state == JobState::Pending || r.lease_expired(now))
            .min_by_key(|r| (r.job.submitted_at, r.job.id))
            .map(|r| r.job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let record = jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        record.state = JobState::Started;
        record.worker_id = Some(worker_id.to_string());
        record.lease_expires_at = Some(lease_deadline(now, lease));
        record.attempts += 1;
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn heartbeat(&self, id: JobId, worker_id: &str, lease: Duration) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        let record = owned(&mut jobs, id, worker_id)?;
        record.lease_expires_at = Some(lease_deadline(now, lease));
        record.updated_at = now;
        Ok(())
    }

    async fn update_progress(
        &self,
        id: JobId,
        worker_id: &str,
        progress: &Progress,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let record = owned(&mut jobs, id, worker_id)?;
        record.progress = Some(progress.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_retry(&self, id: JobId, worker_id: &str, attempt: u32, error: &str) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let record = owned(&mut jobs, id, worker_id)?;
        record.state = JobState::Retry;
        record.error = Some(format!("attempt {}: {}", attempt, error));
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn resume(&self, id: JobId, worker_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let record = owned(&mut jobs, id, worker_id)?;
        record.state = JobState::Started;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, id: JobId, worker_id: &str, outcome: &JobOutcome) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        let record = owned(&mut jobs, id, worker_id)?;
        record.state = outcome.state();
        match outcome {
            JobOutcome::Success(result) => {
                record.result = Some(result.clone());
                record.error = None;
            }
            JobOutcome::Failure(summary) => {
                record.result = None;
                record.error = Some(summary.clone());
            }
        }
        record.lease_expires_at = None;
        record.updated_at = now;
        record.finished_at = Some(now);
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        let mut count = 0;
        for record in jobs.values_mut().filter(|r| r.lease_expired(now)) {
            record.state = JobState::Pending;
            record.worker_id = None;
            record.lease_expires_at = None;
            record.updated_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, r| !(r.state.is_terminal() && r.finished_at.is_some_and(|at| at < cutoff)));
        Ok(before - jobs.len())
    }
}

#[async_trait]
impl RetrySpool for MemoryStore {
    async fn park(
        &self,
        destination: &str,
        payload: serde_json::Value,
        error: &str,
    ) -> Result<RetryItem> {
        let mut spool = self.spool.write().unwrap();
        spool.next_seq += 1;
        let item = RetryItem {
            id: Uuid::new_v4(),
            seq: spool.next_seq,
            destination: destination.to_string(),
            payload,
            created_at: Utc::now(),
            attempt_count: 1,
            last_error: Some(error.to_string()),
            claimed_by: None,
        };
        spool.items.insert(
            item.seq,
            ParkedItem {
                item: item.clone(),
                claim_expires_at: None,
            },
        );
        Ok(item)
    }

    async fn claim_next(
        &self,
        destination: &str,
        after_seq: i64,
        claimant: Uuid,
        lease: Duration,
    ) -> Result<Option<RetryItem>> {
        let now = Utc::now();
        let mut spool = self.spool.write().unwrap();
        let next = spool
            .items
            .range_mut(after_seq + 1..)
            .map(|(_, parked)| parked)
            .find(|p| {
                p.item.destination == destination
                    && p.claim_expires_at.map_or(true, |at| at < now)
            });

        Ok(next.map(|parked| {
            parked.item.claimed_by = Some(claimant);
            parked.claim_expires_at = Some(lease_deadline(now, lease));
            parked.item.clone()
        }))
    }

    async fn ack(&self, item: &RetryItem) -> Result<bool> {
        let mut spool = self.spool.write().unwrap();
        let held = spool
            .items
            .get(&item.seq)
            .is_some_and(|p| p.item.id == item.id && p.item.claimed_by == item.claimed_by);
        if held {
            spool.items.remove(&item.seq);
        }
        Ok(held)
    }

    async fn bump(&self, item: &RetryItem, error: &str) -> Result<()> {
        let mut spool = self.spool.write().unwrap();
        if let Some(parked) = spool.items.get_mut(&item.seq) {
            if parked.item.id == item.id && parked.item.claimed_by == item.claimed_by {
                parked.item.attempt_count += 1;
                parked.item.last_error = Some(error.to_string());
                parked.item.claimed_by = None;
                parked.claim_expires_at = None;
            }
        }
        Ok(())
    }

    async fn pending(&self, destination: &str) -> Result<usize> {
        Ok(self
            .spool
            .read()
            .unwrap()
            .items
            .values()
            .filter(|p| p.item.destination == destination)
            .count())
    }

    async fn destinations(&self) -> Result<Vec<String>> {
        let destinations: BTreeSet<String> = self
            .spool
            .read()
            .unwrap()
            .items
            .values()
            .map(|p| p.item.destination.clone())
            .collect();
        Ok(destinations.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::JobKind;
    use futures::StreamExt;
    use serde_json::json;

    const LEASE: Duration = Duration::from_secs(60);

    fn job() -> Job {
        Job::builder().kind(JobKind::SingleImage).input_ref("p.jpg").build()
    }

    #[tokio::test]
    async fn test_claim_moves_pending_to_started() {
        let store = MemoryStore::new();
        let job = job();
        store.insert(&job).await.unwrap();

        let claimed = store.claim("worker-a", LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id(), job.id);
        assert_eq!(claimed.state, JobState::Started);
        assert_eq!(claimed.attempts, 1);

        assert!(store.claim("worker-b", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let store = MemoryStore::new();
        let job = job();
        store.insert(&job).await.unwrap();

        store.claim("worker-a", Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let reclaimed = store.claim("worker-b", LEASE).await.unwrap().unwrap();
        assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-b"));
        assert_eq!(reclaimed.attempts, 2);

        let err = store
            .complete(job.id, "worker-a", &JobOutcome::Failure("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { .. }));
    }

    #[tokio::test]
    async fn test_terminal_state_is_immutable() {
        let store = MemoryStore::new();
        let job = job();
        store.insert(&job).await.unwrap();
        store.claim("w", LEASE).await.unwrap();
        store
            .complete(job.id, "w", &JobOutcome::Failure("boom".into()))
            .await
            .unwrap();

        let err = store
            .complete(job.id, "w", &JobOutcome::Failure("again".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyTerminal(_)));

        let record = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failure);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_drain_skips_bumped_items_within_one_pass() {
        let store = MemoryStore::new();
        store.park("gw", json!({"n": 1}), "503").await.unwrap();
        store.park("other", json!({"n": 2}), "503").await.unwrap();
        store.park("gw", json!({"n": 3}), "503").await.unwrap();

        let mut drained = Vec::new();
        {
            let mut items = store.drain("gw");
            while let Some(item) = items.next().await {
                let item = item.unwrap();
                store.bump(&item, "still down").await.unwrap();
                drained.push(item);
            }
        }

        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload, json!({"n": 1}));
        assert_eq!(drained[1].payload, json!({"n": 3}));
        assert_eq!(store.pending("gw").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_drains_never_share_an_item() {
        let store = MemoryStore::new();
        store.park("gw", json!(1), "e").await.unwrap();

        let first = store.claim_next("gw", 0, Uuid::new_v4(), LEASE).await.unwrap();
        let second = store.claim_next("gw", 0, Uuid::new_v4(), LEASE).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_ack_requires_matching_claim() {
        let store = MemoryStore::new();
        let parked = store.park("gw", json!(1), "e").await.unwrap();

        // Never claimed by a drain
        let stale = RetryItem {
            claimed_by: Some(Uuid::new_v4()),
            ..parked
        };
        assert!(!store.ack(&stale).await.unwrap());

        let claimed = store
            .claim_next("gw", 0, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        assert!(store.ack(&claimed).await.unwrap());
        assert_eq!(store.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_destinations_drop_out_once_acked() {
        let store = MemoryStore::new();
        store.park("gw-b", json!(1), "e").await.unwrap();
        store.park("gw-a", json!(2), "e").await.unwrap();
        assert_eq!(store.destinations().await.unwrap(), vec!["gw-a", "gw-b"]);

        let item = store
            .claim_next("gw-a", 0, Uuid::new_v4(), LEASE)
            .await
            .unwrap()
            .unwrap();
        store.ack(&item).await.unwrap();
        assert_eq!(store.destinations().await.unwrap(), vec!["gw-b"]);
    }
}
