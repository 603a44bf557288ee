//! Job model: identity, kind, parameters, and ledger state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::types::article::DigitalArticle;
use crate::types::result::JobResult;

/// Media id the gateway assigns to scanned newspapers.
pub const NEWSPAPER_MEDIA_ID: u32 = 1;

/// Media id the gateway assigns to digital news.
pub const DIGITAL_MEDIA_ID: u32 = 2;

// ============================================================================
// Identity
// ============================================================================

/// Opaque job handle returned by `submit` and used for every status lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// First eight hex digits, used to prefix article ids.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Uploaded PDF, results kept in the ledger
    PdfPipeline,
    /// PDF fetched by the crawler tier, results pushed to the gateway
    CrawlPdf,
    /// Already-digital article text
    DigitalJson,
    /// Pre-rendered page images
    DirectImages,
    /// One page image
    SingleImage,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::PdfPipeline,
        JobKind::CrawlPdf,
        JobKind::DigitalJson,
        JobKind::DirectImages,
        JobKind::SingleImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PdfPipeline => "pdf_pipeline",
            JobKind::CrawlPdf => "crawl_pdf",
            JobKind::DigitalJson => "digital_json",
            JobKind::DirectImages => "direct_images",
            JobKind::SingleImage => "single_image",
        }
    }

    /// Whether results are delivered to a callback destination by default.
    pub fn notifies(&self) -> bool {
        matches!(
            self,
            JobKind::CrawlPdf | JobKind::DigitalJson | JobKind::DirectImages
        )
    }

    /// Whether the input is a PDF that goes through the converter.
    pub fn is_pdf(&self) -> bool {
        matches!(self, JobKind::PdfPipeline | JobKind::CrawlPdf)
    }

    /// Gateway media id: digital news or scanned newspaper.
    pub fn media_id(&self) -> u32 {
        match self {
            JobKind::DigitalJson => DIGITAL_MEDIA_ID,
            _ => NEWSPAPER_MEDIA_ID,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown job kind: {}", s))
    }
}

/// Ledger state of a job.
///
/// `Pending -> Started -> (Success | Failure)`, with `Retry` as an excursion
/// between attempts of a transiently failing stage. Terminal states never
/// change once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Started,
    Retry,
    Success,
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Started => "STARTED",
            JobState::Retry => "RETRY",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    /// Owned by a worker holding a lease.
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Started | JobState::Retry)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "STARTED" => Ok(JobState::Started),
            "RETRY" => Ok(JobState::Retry),
            "SUCCESS" => Ok(JobState::Success),
            "FAILURE" => Ok(JobState::Failure),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Kind-specific job parameters. Which fields are required depends on the
/// job kind; see `dispatcher::validate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Edition date as `DD-MM-YYYY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    /// Object keys of pre-rendered pages (`direct_images`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_keys: Vec<String>,
    /// Inline article (`digital_json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article: Option<DigitalArticle>,
    /// Overrides the configured callback destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl JobParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publication(mut self, publication: impl Into<String>) -> Self {
        self.publication = Some(publication.into());
        self
    }

    pub fn with_edition(mut self, edition: impl Into<String>) -> Self {
        self.edition = Some(edition.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn with_image_keys(mut self, keys: Vec<String>) -> Self {
        self.image_keys = keys;
        self
    }

    pub fn with_article(mut self, article: DigitalArticle) -> Self {
        self.article = Some(article);
        self
    }

    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// One unit of end-to-end processing. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default)]
    pub id: JobId,
    pub kind: JobKind,
    #[builder(default, setter(strip_option))]
    pub input_ref: Option<String>,
    #[builder(default)]
    pub params: JobParams,
    #[builder(default = Utc::now())]
    pub submitted_at: DateTime<Utc>,
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStep {
    Initializing,
    Converting,
    Segmenting,
    Analyzing,
    Aggregating,
    Delivering,
    Completed,
}

impl ProcessingStep {
    /// Overall completion percent at the start of this step.
    pub fn percent(&self) -> u8 {
        match self {
            ProcessingStep::Initializing => 5,
            ProcessingStep::Converting => 20,
            ProcessingStep::Segmenting => 50,
            ProcessingStep::Analyzing => 80,
            ProcessingStep::Aggregating => 95,
            ProcessingStep::Delivering => 97,
            ProcessingStep::Completed => 100,
        }
    }
}

/// Progress snapshot written by the owning worker at stage boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub step: ProcessingStep,
    pub percent: u8,
    pub pages_total: u32,
    pub pages_done: u32,
    pub articles_total: u32,
    pub articles_done: u32,
}

impl Progress {
    pub fn at(step: ProcessingStep) -> Self {
        Self {
            step,
            percent: step.percent(),
            pages_total: 0,
            pages_done: 0,
            articles_total: 0,
            articles_done: 0,
        }
    }

    pub fn with_pages(mut self, done: u32, total: u32) -> Self {
        self.pages_done = done;
        self.pages_total = total;
        self
    }

    pub fn with_articles(mut self, done: u32, total: u32) -> Self {
        self.articles_done = done;
        self.articles_total = total;
        self
    }
}

// ============================================================================
// Ledger Record
// ============================================================================

/// How a worker finished a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(JobResult),
    /// Error summary of a job-fatal failure
    Failure(String),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Success(_) => JobState::Success,
            JobOutcome::Failure(_) => JobState::Failure,
        }
    }
}

/// One job ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job: Job,
    pub state: JobState,
    /// Lease holder while the job is live
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Number of times the job has been claimed
    pub attempts: u32,
    pub progress: Option<Progress>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A freshly admitted, unclaimed job.
    pub fn pending(job: Job) -> Self {
        let now = job.submitted_at;
        Self {
            job,
            state: JobState::Pending,
            worker_id: None,
            lease_expires_at: None,
            attempts: 0,
            progress: None,
            result: None,
            error: None,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.job.id
    }

    /// A live job whose owner stopped heartbeating.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_live() && self.lease_expires_at.is_some_and(|at| at < now)
    }

    /// Whether `worker_id` still owns this job. An expired lease stays with
    /// its holder until another worker reclaims it or it is requeued.
    pub fn is_owned_by(&self, worker_id: &str) -> bool {
        self.state.is_live() && self.worker_id.as_deref() == Some(worker_id)
    }
}
