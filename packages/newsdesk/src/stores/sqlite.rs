//! SQLite storage implementation.
//!
//! A file-based backend for the job ledger and retry spool. Good for:
//! - Single-host deployments where every worker shares one database file
//! - A durable retry spool for a scheduler instance
//! - Testing with persistent data

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::stores::lease_deadline;
use crate::traits::{ledger::JobLedger, spool::RetrySpool};
use crate::types::job::{Job, JobId, JobOutcome, JobRecord, JobState, Progress};
use crate::types::spool::RetryItem;

/// SQLite-based ledger and spool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://./newsdesk.db` - File-based database, created if missing
    /// - `sqlite::memory:` - Prefer [`SqliteStore::in_memory`]
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StoreError::backend)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::backend)?;

        Self::from_pool(pool).await
    }

    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::backend)?;

        Self::from_pool(pool).await
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Every connection to `:memory:` is a separate database, so the pool is
    /// pinned to one long-lived connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::backend)?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::backend)?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                input_ref TEXT,
                params TEXT NOT NULL DEFAULT '{}',
                submitted_at INTEGER NOT NULL,
                state TEXT NOT NULL,
                worker_id TEXT,
                lease_expires_at INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0,
                progress TEXT,
                result TEXT,
                error TEXT,
                updated_at INTEGER NOT NULL,
                finished_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(state, submitted_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_finished_at ON jobs(finished_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retry_spool (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                destination TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 1,
                last_error TEXT,
                claimed_by TEXT,
                claim_expires_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_retry_spool_destination ON retry_spool(destination, seq);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Explain why an owner-fenced update touched no row.
    async fn fence_error(&self, id: JobId, worker_id: &str) -> StoreError {
        match self.get(id).await {
            Ok(None) => StoreError::JobNotFound(id),
            Ok(Some(record)) if record.state.is_terminal() => StoreError::AlreadyTerminal(id),
            Ok(Some(_)) => StoreError::LeaseLost {
                job_id: id,
                worker_id: worker_id.to_string(),
            },
            Err(e) => e,
        }
    }

    /// Run an owner-fenced update whose last two placeholders are
    /// `id = ? AND worker_id = ?`.
    async fn fenced<'a>(
        &self,
        query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
        id: JobId,
        worker_id: &str,
    ) -> Result<()> {
        let done = query
            .bind(id.to_string())
            .bind(worker_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        if done.rows_affected() == 0 {
            return Err(self.fence_error(id, worker_id).await);
        }
        Ok(())
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid {}: {}", s, e)))
}

const JOB_COLUMNS: &str = "id, kind, input_ref, params, submitted_at, state, worker_id, \
    lease_expires_at, attempts, progress, result, error, updated_at, finished_at";

const LIVE: &str = "state IN ('STARTED', 'RETRY')";

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    kind: String,
    input_ref: Option<String>,
    params: String,
    submitted_at: i64,
    state: String,
    worker_id: Option<String>,
    lease_expires_at: Option<i64>,
    attempts: i64,
    progress: Option<String>,
    result: Option<String>,
    error: Option<String>,
    updated_at: i64,
    finished_at: Option<i64>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        let job = Job {
            id: JobId::from(parse_uuid(&self.id)?),
            kind: self.kind.parse().map_err(StoreError::Corrupt)?,
            input_ref: self.input_ref,
            params: serde_json::from_str(&self.params)?,
            submitted_at: from_millis(self.submitted_at)?,
        };

        Ok(JobRecord {
            job,
            state: self.state.parse::<JobState>().map_err(StoreError::Corrupt)?,
            worker_id: self.worker_id,
            lease_expires_at: self.lease_expires_at.map(from_millis).transpose()?,
            attempts: self.attempts.max(0) as u32,
            progress: self
                .progress
                .map(|p| serde_json::from_str(&p))
                .transpose()?,
            result: self.result.map(|r| serde_json::from_str(&r)).transpose()?,
            error: self.error,
            updated_at: from_millis(self.updated_at)?,
            finished_at: self.finished_at.map(from_millis).transpose()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SpoolRow {
    seq: i64,
    id: String,
    destination: String,
    payload: String,
    created_at: i64,
    attempt_count: i64,
    last_error: Option<String>,
    claimed_by: Option<String>,
}

impl SpoolRow {
    fn into_item(self) -> Result<RetryItem> {
        Ok(RetryItem {
            id: parse_uuid(&self.id)?,
            seq: self.seq,
            destination: self.destination,
            payload: serde_json::from_str(&self.payload)?,
            created_at: from_millis(self.created_at)?,
            attempt_count: self.attempt_count.max(0) as u32,
            last_error: self.last_error,
            claimed_by: self.claimed_by.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

#[async_trait]
impl JobLedger for SqliteStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let submitted = millis(job.submitted_at);
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, input_ref, params, submitted_at, state, attempts, updated_at)
            VALUES (?, ?, ?, ?, ?, 'PENDING', 0, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.kind.as_str())
        .bind(&job.input_ref)
        .bind(serde_json::to_string(&job.params)?)
        .bind(submitted)
        .bind(submitted)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::backend)?;

        row.map(JobRow::into_record).transpose()
    }

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<JobRecord>> {
        let now = Utc::now();
        // A write statement takes the database write lock before evaluating
        // the subquery, so two claimers cannot pick the same row.
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = 'STARTED',
                worker_id = ?,
                lease_expires_at = ?,
                attempts = attempts + 1,
                updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'PENDING'
                   OR ({live} AND lease_expires_at < ?)
                ORDER BY submitted_at, id
                LIMIT 1
            )
            RETURNING {columns}
            "#,
            live = LIVE,
            columns = JOB_COLUMNS
        );

        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(worker_id)
            .bind(millis(lease_deadline(now, lease)))
            .bind(millis(now))
            .bind(millis(now))
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        row.map(JobRow::into_record).transpose()
    }

    async fn heartbeat(&self, id: JobId, worker_id: &str, lease: Duration) -> Result<()> {
        let now = Utc::now();
        let sql = format!(
            "UPDATE jobs SET lease_expires_at = ?, updated_at = ? WHERE id = ? AND worker_id = ? AND {}",
            LIVE
        );
        let query = sqlx::query(&sql)
            .bind(millis(lease_deadline(now, lease)))
            .bind(millis(now));
        self.fenced(query, id, worker_id).await
    }

    async fn update_progress(
        &self,
        id: JobId,
        worker_id: &str,
        progress: &Progress,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ? AND worker_id = ? AND {}",
            LIVE
        );
        let query = sqlx::query(&sql)
            .bind(serde_json::to_string(progress)?)
            .bind(millis(Utc::now()));
        self.fenced(query, id, worker_id).await
    }

    async fn mark_retry(&self, id: JobId, worker_id: &str, attempt: u32, error: &str) -> Result<()> {
        let sql = format!(
            "UPDATE jobs SET state = 'RETRY', error = ?, updated_at = ? WHERE id = ? AND worker_id = ? AND {}",
            LIVE
        );
        let query = sqlx::query(&sql)
            .bind(format!("attempt {}: {}", attempt, error))
            .bind(millis(Utc::now()));
        self.fenced(query, id, worker_id).await
    }

    async fn resume(&self, id: JobId, worker_id: &str) -> Result<()> {
        let sql = format!(
            "UPDATE jobs SET state = 'STARTED', updated_at = ? WHERE id = ? AND worker_id = ? AND {}",
            LIVE
        );
        let query = sqlx::query(&sql).bind(millis(Utc::now()));
        self.fenced(query, id, worker_id).await
    }

    async fn complete(&self, id: JobId, worker_id: &str, outcome: &JobOutcome) -> Result<()> {
        let now = millis(Utc::now());
        let (result, error) = match outcome {
            JobOutcome::Success(result) => (Some(serde_json::to_string(result)?), None),
            JobOutcome::Failure(summary) => (None, Some(summary.clone())),
        };

        let sql = format!(
            r#"
            UPDATE jobs
            SET state = ?, result = ?, error = ?, lease_expires_at = NULL,
                updated_at = ?, finished_at = ?
            WHERE id = ? AND worker_id = ? AND {}
            "#,
            LIVE
        );
        let query = sqlx::query(&sql)
            .bind(outcome.state().as_str())
            .bind(result)
            .bind(error)
            .bind(now)
            .bind(now);
        self.fenced(query, id, worker_id).await
    }

    async fn requeue_expired(&self) -> Result<usize> {
        let now = millis(Utc::now());
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = 'PENDING', worker_id = NULL, lease_expires_at = NULL, updated_at = ?
            WHERE {} AND lease_expires_at < ?
            "#,
            LIVE
        );
        let done = sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(done.rows_affected() as usize)
    }

    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let done = sqlx::query(
            "DELETE FROM jobs WHERE state IN ('SUCCESS', 'FAILURE') AND finished_at < ?",
        )
        .bind(millis(cutoff))
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(done.rows_affected() as usize)
    }
}

const SPOOL_COLUMNS: &str =
    "seq, id, destination, payload, created_at, attempt_count, last_error, claimed_by";

#[async_trait]
impl RetrySpool for SqliteStore {
    async fn park(
        &self,
        destination: &str,
        payload: serde_json::Value,
        error: &str,
    ) -> Result<RetryItem> {
        let row: SpoolRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO retry_spool (id, destination, payload, created_at, attempt_count, last_error)
            VALUES (?, ?, ?, ?, 1, ?)
            RETURNING {}
            "#,
            SPOOL_COLUMNS
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(destination)
        .bind(serde_json::to_string(&payload)?)
        .bind(millis(Utc::now()))
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.into_item()
    }

    async fn claim_next(
        &self,
        destination: &str,
        after_seq: i64,
        claimant: Uuid,
        lease: Duration,
    ) -> Result<Option<RetryItem>> {
        let now = Utc::now();
        let row: Option<SpoolRow> = sqlx::query_as(&format!(
            r#"
            UPDATE retry_spool
            SET claimed_by = ?, claim_expires_at = ?
            WHERE seq = (
                SELECT seq FROM retry_spool
                WHERE destination = ?
                  AND seq > ?
                  AND (claimed_by IS NULL OR claim_expires_at < ?)
                ORDER BY seq
                LIMIT 1
            )
            RETURNING {}
            "#,
            SPOOL_COLUMNS
        ))
        .bind(claimant.to_string())
        .bind(millis(lease_deadline(now, lease)))
        .bind(destination)
        .bind(after_seq)
        .bind(millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        row.map(SpoolRow::into_item).transpose()
    }

    async fn ack(&self, item: &RetryItem) -> Result<bool> {
        let Some(claimant) = item.claimed_by else {
            return Ok(false);
        };

        let done = sqlx::query("DELETE FROM retry_spool WHERE seq = ? AND id = ? AND claimed_by = ?")
            .bind(item.seq)
            .bind(item.id.to_string())
            .bind(claimant.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(done.rows_affected() == 1)
    }

    async fn bump(&self, item: &RetryItem, error: &str) -> Result<()> {
        let Some(claimant) = item.claimed_by else {
            return Ok(());
        };

        sqlx::query(
            r#"
            UPDATE retry_spool
            SET attempt_count = attempt_count + 1, last_error = ?,
                claimed_by = NULL, claim_expires_at = NULL
            WHERE seq = ? AND claimed_by = ?
            "#,
        )
        .bind(error)
        .bind(item.seq)
        .bind(claimant.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(())
    }

    async fn pending(&self, destination: &str) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM retry_spool WHERE destination = ?")
                .bind(destination)
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::backend)?;

        Ok(count.max(0) as usize)
    }

    async fn destinations(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT destination FROM retry_spool ORDER BY destination",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)
    }
}
