//! Per-job pipeline: CONVERT -> SEGMENT -> pre-filter -> ANALYZE+UPLOAD ->
//! AGGREGATE -> CALLBACK.
//!
//! Stages run strictly in order. Inside SEGMENT and ANALYZE+UPLOAD the work
//! fans out over two independently sized pools. Only CONVERT (and loading the
//! input it needs) can fail the job; page and article failures are recorded
//! in the result and the job still succeeds.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Stage, StageFailure, StoreError, ValidationError};
use crate::pipeline::callback::deliver_or_park;
use crate::pipeline::dates::{format_edition_date, is_edition_date, page_indices, resolve_edition_date};
use crate::pipeline::executor::{retry_stage, run_bounded};
use crate::pipeline::progress::JobReporter;
use crate::traits::spool::{redeliver_all, RetrySpool};
use crate::traits::stages::{Analyzer, CallbackSink, Converter, ObjectStore, Segmenter};
use crate::types::article::{AnalysisInput, ArticleOutcome, ArticleResult, DigitalArticle};
use crate::types::config::PipelineConfig;
use crate::types::job::{Job, JobKind, ProcessingStep, Progress};
use crate::types::page::{ArticleKey, PageImage, PageUnit, SegmentLabel, SegmentUnit};
use crate::types::result::{CallbackPayload, DeliveryOutcome, JobResult, PageFailure};
use crate::types::spool::RedeliveryReport;

/// The external services one pipeline run calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub converter: Arc<dyn Converter>,
    pub segmenter: Arc<dyn Segmenter>,
    pub analyzer: Arc<dyn Analyzer>,
    pub objects: Arc<dyn ObjectStore>,
    pub sink: Arc<dyn CallbackSink>,
}

/// Input after the load/convert stage.
enum Source {
    Pages(Vec<PageUnit>),
    Text(DigitalArticle),
}

/// Something the analysis stage will look at.
enum Candidate {
    Region { unit: SegmentUnit, page: PageImage },
    Text { key: ArticleKey, article: DigitalArticle },
}

impl Candidate {
    fn key(&self) -> ArticleKey {
        match self {
            Candidate::Region { unit, .. } => unit.key,
            Candidate::Text { key, .. } => *key,
        }
    }

    fn label(&self) -> SegmentLabel {
        match self {
            Candidate::Region { unit, .. } => unit.label.clone(),
            Candidate::Text { .. } => SegmentLabel::Article,
        }
    }

    fn crop(&self) -> Option<Bytes> {
        match self {
            Candidate::Region { unit, .. } => unit.crop.clone(),
            Candidate::Text { .. } => None,
        }
    }

    fn analysis_input(&self, language: Option<String>) -> AnalysisInput {
        match self {
            Candidate::Region { unit, page } => AnalysisInput::Image {
                key: unit.key,
                image: unit.crop.clone().unwrap_or_else(|| page.bytes.clone()),
                bbox: unit.bbox,
                language,
            },
            Candidate::Text { key, article } => AnalysisInput::Text {
                key: *key,
                title: article.title.clone(),
                content: article.content.clone(),
                language,
            },
        }
    }
}

/// Sequences the stages for one job at a time.
pub struct PipelineCoordinator {
    stages: Collaborators,
    spool: Arc<dyn RetrySpool>,
    config: PipelineConfig,
}

impl PipelineCoordinator {
    pub fn new(stages: Collaborators, spool: Arc<dyn RetrySpool>, config: PipelineConfig) -> Self {
        Self {
            stages,
            spool,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Replay every callback parked in the spool through this pipeline's sink.
    pub async fn redeliver_parked(&self) -> Result<RedeliveryReport, StoreError> {
        redeliver_all(self.spool.as_ref(), self.stages.sink.as_ref()).await
    }

    /// Run every stage for `job`. An `Err` is job-fatal.
    pub async fn run(
        &self,
        job: &Job,
        reporter: &dyn JobReporter,
    ) -> Result<JobResult, PipelineError> {
        reporter.progress(Progress::at(ProcessingStep::Initializing)).await;

        let source = match self.load(job, reporter).await {
            Ok(source) => source,
            Err(e) => {
                error!(job_id = %job.id, kind = %job.kind, error = %e, "job aborted before segmentation");
                return Err(e);
            }
        };

        let (candidates, page_failures, total_pages) = match source {
            Source::Pages(pages) => {
                let total = pages.len() as u32;
                reporter
                    .progress(Progress::at(ProcessingStep::Segmenting).with_pages(0, total))
                    .await;

                let (segmented, failures) = self.segment_pages(pages).await;
                let candidates = self.pre_filter(segmented);
                (candidates, failures, total)
            }
            Source::Text(article) => {
                let key = ArticleKey::new(1, 0);
                (vec![Candidate::Text { key, article }], Vec::new(), 0)
            }
        };

        let candidate_count = candidates.len() as u32;
        reporter
            .progress(
                Progress::at(ProcessingStep::Analyzing)
                    .with_pages(total_pages - page_failures.len() as u32, total_pages)
                    .with_articles(0, candidate_count),
            )
            .await;

        let articles = self.analyze_all(job, candidates).await;

        reporter
            .progress(
                Progress::at(ProcessingStep::Aggregating)
                    .with_pages(total_pages - page_failures.len() as u32, total_pages)
                    .with_articles(candidate_count, candidate_count),
            )
            .await;

        let mut result = self.aggregate(job, articles, page_failures, total_pages);

        if let Some(destination) = self.destination(job) {
            if result.analyzed_count() == 0 {
                debug!(job_id = %job.id, destination = %destination, "no analyzed articles, skipping callback");
                result.delivery = DeliveryOutcome::Skipped {
                    destination: destination.to_string(),
                };
            } else {
                reporter.progress(Progress::at(ProcessingStep::Delivering)).await;
                result.delivery = self.deliver(&result, destination).await;
            }
        }

        let pages_done = total_pages - result.page_failures.len() as u32;
        reporter
            .progress(
                Progress::at(ProcessingStep::Completed)
                    .with_pages(pages_done, total_pages)
                    .with_articles(result.articles.len() as u32, candidate_count),
            )
            .await;

        info!(
            job_id = %job.id,
            kind = %job.kind,
            pages = result.total_pages,
            page_failures = result.page_failures.len(),
            analyzed = result.analyzed_count(),
            failed = result.failed_count(),
            "pipeline finished"
        );

        Ok(result)
    }

    // ------------------------------------------------------------------
    // CONVERT
    // ------------------------------------------------------------------

    async fn load(&self, job: &Job, reporter: &dyn JobReporter) -> Result<Source, PipelineError> {
        match job.kind {
            JobKind::PdfPipeline | JobKind::CrawlPdf => {
                let key = required_input(job)?;
                let document = self.fetch(key).await.map_err(PipelineError::Load)?;

                reporter.progress(Progress::at(ProcessingStep::Converting)).await;
                let images = self.convert(job, document, reporter).await?;

                Ok(Source::Pages(
                    images
                        .into_iter()
                        .enumerate()
                        .map(|(i, image)| PageUnit::new(i as u32 + 1, image))
                        .collect(),
                ))
            }
            JobKind::DirectImages => {
                reporter.progress(Progress::at(ProcessingStep::Converting)).await;
                let keys = &job.params.image_keys;
                if keys.is_empty() {
                    return Err(ValidationError::MissingField {
                        kind: job.kind,
                        field: "image_keys",
                    }
                    .into());
                }

                let items: Vec<(u32, String)> =
                    page_indices(keys).into_iter().zip(keys.iter().cloned()).collect();
                let fetched = run_bounded(items, self.config.page_concurrency, |_, key| async move {
                    self.fetch(&key).await
                })
                .await;

                let mut pages = Vec::with_capacity(fetched.len());
                for (index, bytes) in fetched {
                    pages.push(PageUnit::new(index, PageImage::new(bytes.map_err(PipelineError::Load)?)));
                }
                Ok(Source::Pages(pages))
            }
            JobKind::SingleImage => {
                let key = required_input(job)?;
                let bytes = self.fetch(key).await.map_err(PipelineError::Load)?;
                Ok(Source::Pages(vec![PageUnit::new(1, PageImage::new(bytes))]))
            }
            JobKind::DigitalJson => {
                if let Some(article) = &job.params.article {
                    return Ok(Source::Text(article.clone()));
                }
                let key = required_input(job)?;
                let bytes = self.fetch(key).await.map_err(PipelineError::Load)?;
                let article: DigitalArticle = serde_json::from_slice(&bytes)?;
                Ok(Source::Text(article))
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, StageFailure> {
        retry_stage(&self.config.storage_retry, || self.stages.objects.get(key)).await
    }

    /// Conversion retries are visible in the ledger as a RETRY excursion.
    async fn convert(
        &self,
        job: &Job,
        document: Bytes,
        reporter: &dyn JobReporter,
    ) -> Result<Vec<PageImage>, PipelineError> {
        let policy = &self.config.conversion_retry;
        let dpi = job.params.dpi.unwrap_or(self.config.dpi);
        let quality = job.params.quality.unwrap_or(self.config.quality);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .stages
                .converter
                .convert(document.clone(), dpi, quality)
                .await
            {
                Ok(pages) => {
                    debug!(job_id = %job.id, pages = pages.len(), attempt, "document converted");
                    return Ok(pages);
                }
                Err(e) if e.is_transient() && attempt < policy.attempts() => {
                    warn!(job_id = %job.id, attempt, error = %e, "conversion failed, will retry");
                    reporter.retrying(attempt, &e.to_string()).await;
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    reporter.resumed().await;
                }
                Err(e) => {
                    return Err(PipelineError::Conversion(StageFailure {
                        error: e,
                        attempts: attempt,
                    }))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // SEGMENT + pre-filter
    // ------------------------------------------------------------------

    async fn segment_pages(&self, pages: Vec<PageUnit>) -> (Vec<PageUnit>, Vec<PageFailure>) {
        let policy = &self.config.segmentation_retry;
        let items: Vec<(u32, PageUnit)> = pages.into_iter().map(|p| (p.index, p)).collect();

        let results = run_bounded(items, self.config.page_concurrency, |index, page| async move {
            let segments = retry_stage(policy, || self.stages.segmenter.segment(&page.image)).await;
            match segments {
                Ok(segments) => {
                    debug!(page = index, segments = segments.len(), "page segmented");
                    Ok(page.with_segments(segments))
                }
                Err(failure) => Err(failure),
            }
        })
        .await;

        let mut segmented = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (index, outcome) in results {
            match outcome {
                Ok(page) => segmented.push(page),
                Err(failure) => {
                    warn!(page = index, error = %failure, "segmentation failed, page skipped");
                    failures.push(PageFailure {
                        page_index: index,
                        error: failure.error.message().to_string(),
                        attempts: failure.attempts,
                    });
                }
            }
        }
        (segmented, failures)
    }

    fn pre_filter(&self, pages: Vec<PageUnit>) -> Vec<Candidate> {
        let filter = &self.config.pre_filter;
        let mut candidates = Vec::new();

        for page in pages {
            for unit in page.segments {
                if filter.admits(&unit) {
                    candidates.push(Candidate::Region {
                        unit,
                        page: page.image.clone(),
                    });
                } else {
                    debug!(key = %unit.key, label = %unit.label, "segment dropped by pre-filter");
                }
            }
        }
        candidates
    }

    // ------------------------------------------------------------------
    // ANALYZE + UPLOAD
    // ------------------------------------------------------------------

    async fn analyze_all(&self, job: &Job, candidates: Vec<Candidate>) -> Vec<ArticleResult> {
        let items: Vec<(ArticleKey, Candidate)> =
            candidates.into_iter().map(|c| (c.key(), c)).collect();

        run_bounded(items, self.config.article_concurrency, |_, candidate| {
            self.process_article(job, candidate)
        })
        .await
        .into_iter()
        .map(|(_, result)| result)
        .collect()
    }

    async fn process_article(&self, job: &Job, candidate: Candidate) -> ArticleResult {
        let key = candidate.key();
        let article_id = format!("{}_p{}_s{}", job.id.short(), key.page_index, key.segment_index);
        let input = candidate.analysis_input(job.params.language.clone());

        let analysis = retry_stage(&self.config.analysis_retry, || {
            self.stages.analyzer.analyze(&input)
        })
        .await;

        let analysis = match analysis {
            Ok(analysis) => analysis,
            Err(failure) => {
                warn!(
                    job_id = %job.id,
                    key = %key,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "article analysis failed permanently"
                );
                return ArticleResult {
                    key,
                    article_id,
                    label: candidate.label(),
                    outcome: ArticleOutcome::Failed {
                        stage: Stage::Analyze,
                        error: failure.error.message().to_string(),
                        attempts: failure.attempts,
                    },
                };
            }
        };

        let prefix = asset_prefix(job, key.page_index);
        let mut upload_errors = Vec::new();

        let image_url = match candidate.crop() {
            Some(crop) => {
                let image_key = format!("{}/{}.jpg", prefix, article_id);
                match self.put(&image_key, crop, "image/jpeg").await {
                    Ok(url) => Some(url),
                    Err(failure) => {
                        upload_errors.push(failure.to_string());
                        None
                    }
                }
            }
            None => None,
        };

        let analysis_url = match serde_json::to_vec(&analysis) {
            Ok(body) => {
                let json_key = format!("{}/{}.json", prefix, article_id);
                match self.put(&json_key, Bytes::from(body), "application/json").await {
                    Ok(url) => Some(url),
                    Err(failure) => {
                        upload_errors.push(failure.to_string());
                        None
                    }
                }
            }
            Err(e) => {
                upload_errors.push(e.to_string());
                None
            }
        };

        let upload_error = if upload_errors.is_empty() {
            None
        } else {
            warn!(job_id = %job.id, key = %key, errors = ?upload_errors, "article upload incomplete");
            Some(upload_errors.join("; "))
        };

        ArticleResult {
            key,
            article_id,
            label: candidate.label(),
            outcome: ArticleOutcome::Analyzed {
                analysis,
                image_url,
                analysis_url,
                upload_error,
            },
        }
    }

    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<String, StageFailure> {
        retry_stage(&self.config.storage_retry, || {
            self.stages.objects.put(key, bytes.clone(), content_type)
        })
        .await
    }

    // ------------------------------------------------------------------
    // AGGREGATE + CALLBACK
    // ------------------------------------------------------------------

    fn aggregate(
        &self,
        job: &Job,
        mut articles: Vec<ArticleResult>,
        page_failures: Vec<PageFailure>,
        total_pages: u32,
    ) -> JobResult {
        articles.sort_by_key(|a| a.key);

        let mut dropped_untagged = 0;
        if self.config.require_tags {
            articles.retain(|a| match a.analysis() {
                Some(analysis) if !analysis.is_tagged() => {
                    dropped_untagged += 1;
                    false
                }
                _ => true,
            });
        }

        let edition_date = resolve_edition_date(
            job.params.date.as_deref(),
            articles
                .iter()
                .filter_map(|a| a.analysis())
                .flat_map(|analysis| analysis.dates.iter().map(String::as_str)),
            Utc::now().date_naive(),
        );

        JobResult {
            job_id: job.id,
            kind: job.kind,
            publication: job.params.publication.clone(),
            edition: job.params.edition.clone(),
            language: job.params.language.clone(),
            zone: job.params.zone.clone(),
            edition_date,
            total_pages,
            articles,
            page_failures,
            dropped_untagged,
            delivery: DeliveryOutcome::NotRequested,
        }
    }

    fn destination<'a>(&'a self, job: &'a Job) -> Option<&'a str> {
        if let Some(url) = job.params.callback_url.as_deref() {
            return Some(url);
        }
        if job.kind.notifies() {
            return self.config.default_callback_url.as_deref();
        }
        None
    }

    async fn deliver(&self, result: &JobResult, destination: &str) -> DeliveryOutcome {
        let payload = match serde_json::to_value(CallbackPayload::from_result(result)) {
            Ok(payload) => payload,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    destination: destination.to_string(),
                    error: e.to_string(),
                }
            }
        };

        match deliver_or_park(
            self.stages.sink.as_ref(),
            self.spool.as_ref(),
            &self.config.callback_retry,
            destination,
            payload,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %result.job_id, destination = %destination, error = %e, "could not park undelivered payload");
                DeliveryOutcome::Failed {
                    destination: destination.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }
}

fn required_input(job: &Job) -> Result<&str, PipelineError> {
    job.input_ref
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(PipelineError::Invalid(ValidationError::MissingField {
            kind: job.kind,
            field: "input_ref",
        }))
}

/// `{publication}/{edition}/{date}/page_{n}` with path-safe segments.
fn asset_prefix(job: &Job, page_index: u32) -> String {
    let date = job
        .params
        .date
        .as_deref()
        .filter(|d| is_edition_date(d))
        .map(str::to_string)
        .unwrap_or_else(|| format_edition_date(job.submitted_at.date_naive()));

    format!(
        "{}/{}/{}/page_{}",
        path_segment(job.params.publication.as_deref().unwrap_or("unknown")),
        path_segment(job.params.edition.as_deref().unwrap_or("default")),
        date,
        page_index
    )
}

fn path_segment(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
