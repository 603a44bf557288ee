//! Typed errors for the newsdesk library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! rejected submission from a dead stage from a storage outage.

use std::fmt;

use thiserror::Error;

use crate::types::job::{JobId, JobKind};

/// A pipeline stage, used to tag stage errors and failure placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Convert,
    Segment,
    Analyze,
    Upload,
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Convert => "convert",
            Stage::Segment => "segment",
            Stage::Analyze => "analyze",
            Stage::Upload => "upload",
            Stage::Deliver => "deliver",
        };
        f.write_str(name)
    }
}

/// A submission rejected before anything is stored. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} job requires `{field}`")]
    MissingField { kind: JobKind, field: &'static str },

    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failure reported by an external collaborator for one stage call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Eligible for bounded retry with backoff
    #[error("{stage} failed (transient): {message}")]
    Transient { stage: Stage, message: String },

    /// Retrying will not help
    #[error("{stage} failed: {message}")]
    Permanent { stage: Stage, message: String },
}

impl StageError {
    pub fn transient(stage: Stage, message: impl Into<String>) -> Self {
        Self::Transient {
            stage,
            message: message.into(),
        }
    }

    pub fn permanent(stage: Stage, message: impl Into<String>) -> Self {
        Self::Permanent {
            stage,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient { .. })
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageError::Transient { stage, .. } | StageError::Permanent { stage, .. } => *stage,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Transient { message, .. } | StageError::Permanent { message, .. } => {
                message
            }
        }
    }
}

/// A stage call that gave up, either on a permanent error or after the
/// retry budget ran out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct StageFailure {
    pub error: StageError,
    pub attempts: u32,
}

impl StageFailure {
    pub fn stage(&self) -> Stage {
        self.error.stage()
    }
}

/// Job-fatal error. Aborts the whole job; nothing downstream runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document could not be loaded: {0}")]
    Load(StageFailure),

    #[error("conversion failed: {0}")]
    Conversion(StageFailure),

    #[error("stored article is malformed: {0}")]
    MalformedArticle(#[from] serde_json::Error),

    #[error("job input rejected: {0}")]
    Invalid(#[from] ValidationError),
}

/// Outbound delivery failure. The payload goes to the retry spool.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("endpoint {endpoint} rejected delivery with status {status}")]
    Rejected { endpoint: String, status: u16 },

    #[error("transport error delivering to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
}

/// Storage backend errors shared by the job ledger and the retry spool.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend operation failed
    #[error("storage error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON column could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The caller no longer holds the lease on this job
    #[error("lease on job {job_id} is not held by {worker_id}")]
    LeaseLost { job_id: JobId, worker_id: String },

    #[error("job {0} already reached a terminal state")]
    AlreadyTerminal(JobId),

    /// A stored row did not decode into a domain value
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub(crate) fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(e))
    }
}

/// Invalid process configuration, detected once at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker_id {worker_id} is out of range for {total_workers} worker(s)")]
    WorkerOutOfRange { worker_id: usize, total_workers: usize },

    #[error("total_workers must be at least 1")]
    NoWorkers,

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Errors surfaced by the dispatcher's `submit`/`status` contract.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown job: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_classification() {
        let e = StageError::transient(Stage::Analyze, "timeout");
        assert!(e.is_transient());
        assert_eq!(e.stage(), Stage::Analyze);
        assert_eq!(e.to_string(), "analyze failed (transient): timeout");

        let e = StageError::permanent(Stage::Segment, "bad image");
        assert!(!e.is_transient());
        assert_eq!(e.message(), "bad image");
    }

    #[test]
    fn test_validation_error_names_kind_and_field() {
        let e = ValidationError::MissingField {
            kind: JobKind::PdfPipeline,
            field: "input_ref",
        };
        assert_eq!(e.to_string(), "pdf_pipeline job requires `input_ref`");
    }
}
