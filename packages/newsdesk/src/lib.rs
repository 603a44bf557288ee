//! Job Orchestration Core for the Newspaper Clipping Pipeline
//!
//! Takes scanned and digital newspaper content through conversion,
//! segmentation, per-article AI analysis, and delivery, spread over a pool
//! of independent worker processes.
//!
//! # Architecture
//!
//! ```text
//! submit ─► Dispatcher ─► JobLedger (PENDING rows are the queue)
//!                              │ claim + lease
//!                              ▼
//!                         WorkerLoop ─► PipelineCoordinator
//!                                         CONVERT
//!                                         SEGMENT   (page pool)
//!                                         pre-filter
//!                                         ANALYZE + UPLOAD (article pool)
//!                                         AGGREGATE
//!                                         CALLBACK ─► RetrySpool on failure
//!
//! CrawlCycle (per scheduler process, own share of the sites)
//!     redeliver spool ─► fetch sites ─► deliver or park
//! ```
//!
//! Workers share nothing in memory. Everything that crosses a process
//! boundary goes through the ledger or the spool.
//!
//! # Usage
//!
//! ```rust,ignore
//! use newsdesk::{Dispatcher, JobKind, JobParams, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let dispatcher = Dispatcher::new(store.clone());
//!
//! let id = dispatcher
//!     .submit(JobKind::SingleImage, Some("scans/front.jpg".into()), JobParams::new().with_language("hi"))
//!     .await?;
//!
//! let status = dispatcher.status(id).await?;
//! ```
//!
//! # Modules
//!
//! - [`dispatcher`] - Job admission and status lookup
//! - [`worker`] - Claim/run/complete loop with recycling and memory ceiling
//! - [`pipeline`] - Stage sequencing, bounded fan-out, retries, delivery
//! - [`partition`] - Deterministic site split across scheduler workers
//! - [`scheduler`] - One crawl cycle for a worker's share
//! - [`traits`] - Ledger, spool, and external collaborator abstractions
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore, PostgresStore)
//! - [`testing`] - Mock implementations for testing

pub mod dispatcher;
pub mod error;
pub mod partition;
pub mod pipeline;
pub mod scheduler;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod worker;

// Re-export core types at crate root
pub use error::{
    ConfigError, DeliveryError, DispatchError, PipelineError, Stage, StageError, StageFailure,
    StoreError, ValidationError,
};
pub use traits::{
    ledger::JobLedger,
    spool::{redeliver, redeliver_all, RetrySpool, DRAIN_CLAIM_LEASE},
    stages::{Analyzer, CallbackSink, Converter, ObjectStore, Segmenter, SiteFeed},
};
pub use types::{
    article::{AnalysisInput, ArticleAnalysis, ArticleOutcome, ArticleResult, DigitalArticle, Sentiment},
    config::{PipelineConfig, PreFilter, RetryPolicy},
    job::{
        Job, JobId, JobKind, JobOutcome, JobParams, JobRecord, JobState, ProcessingStep, Progress,
        DIGITAL_MEDIA_ID, NEWSPAPER_MEDIA_ID,
    },
    page::{ArticleKey, BoundingBox, PageImage, PageUnit, Segment, SegmentLabel, SegmentUnit},
    result::{CallbackArticle, CallbackPayload, DeliveryOutcome, JobResult, PageFailure},
    spool::{RedeliveryReport, RetryItem},
};

pub use dispatcher::{validate, Dispatcher, JobStatus};
pub use partition::{partition, partition_for, stagger_offset, Site, WorkerIdentity, WorkerShare};
pub use pipeline::{
    deliver_or_park, retry_stage, run_bounded, Collaborators, JobReporter, LedgerReporter,
    NoopReporter, PipelineCoordinator,
};
pub use scheduler::{CrawlCycle, CrawledArticle, CycleReport, SchedulerConfig};
pub use worker::{MemoryProbe, ProcStatmProbe, WorkerConfig, WorkerExit, WorkerLoop};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;

// Re-export testing utilities
pub use testing::{
    FixedMemoryProbe, MemoryObjectStore, MockAnalyzer, MockCallbackSink, MockConverter,
    MockSegmenter, MockSiteFeed,
};
