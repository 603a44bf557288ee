//! Job admission and status lookup.
//!
//! `submit` validates the per-kind contract and inserts a PENDING row into
//! the ledger; nothing invalid is ever stored. `status` reads the row back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{DispatchError, ValidationError};
use crate::pipeline::dates::is_edition_date;
use crate::traits::ledger::JobLedger;
use crate::types::job::{Job, JobId, JobKind, JobParams, JobState, Progress};
use crate::types::result::JobResult;

/// Minimum trimmed length of an inline `digital_json` article body.
pub const MIN_ARTICLE_CONTENT_CHARS: usize = 50;

/// Client-facing view of a job ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Check a submission against its kind's required fields.
pub fn validate(
    kind: JobKind,
    input_ref: Option<&str>,
    params: &JobParams,
) -> Result<(), ValidationError> {
    let missing = |field: &'static str| ValidationError::MissingField { kind, field };
    let present = |value: Option<&str>| value.is_some_and(|v| !v.trim().is_empty());

    let require_metadata = || -> Result<(), ValidationError> {
        if !present(params.publication.as_deref()) {
            return Err(missing("publication"));
        }
        if !present(params.language.as_deref()) {
            return Err(missing("language"));
        }
        if !present(params.zone.as_deref()) {
            return Err(missing("zone"));
        }
        Ok(())
    };

    match kind {
        JobKind::PdfPipeline | JobKind::CrawlPdf => {
            if !present(input_ref) {
                return Err(missing("input_ref"));
            }
            require_metadata()?;
            if kind == JobKind::CrawlPdf {
                match params.date.as_deref() {
                    None => return Err(missing("date")),
                    Some(date) if !is_edition_date(date) => {
                        return Err(ValidationError::InvalidField {
                            field: "date",
                            reason: format!("`{}` is not a DD-MM-YYYY date", date),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        JobKind::DigitalJson => {
            match &params.article {
                Some(article) => {
                    let chars = article.content.trim().chars().count();
                    if chars < MIN_ARTICLE_CONTENT_CHARS {
                        return Err(ValidationError::InvalidField {
                            field: "article",
                            reason: format!(
                                "content has {} characters, at least {} required",
                                chars, MIN_ARTICLE_CONTENT_CHARS
                            ),
                        });
                    }
                }
                None if !present(input_ref) => return Err(missing("article")),
                None => {}
            }
            if !present(params.language.as_deref()) {
                return Err(missing("language"));
            }
        }
        JobKind::DirectImages => {
            if params.image_keys.is_empty() {
                return Err(missing("image_keys"));
            }
            if params.image_keys.iter().any(|k| k.trim().is_empty()) {
                return Err(ValidationError::InvalidField {
                    field: "image_keys",
                    reason: "image keys must not be blank".to_string(),
                });
            }
            require_metadata()?;
        }
        JobKind::SingleImage => {
            if !present(input_ref) {
                return Err(missing("input_ref"));
            }
            if !present(params.language.as_deref()) {
                return Err(missing("language"));
            }
        }
    }

    if let Some(date) = params.date.as_deref() {
        if !is_edition_date(date) {
            return Err(ValidationError::InvalidField {
                field: "date",
                reason: format!("`{}` is not a DD-MM-YYYY date", date),
            });
        }
    }

    Ok(())
}

/// Front door of the job system.
pub struct Dispatcher {
    ledger: Arc<dyn JobLedger>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<dyn JobLedger>) -> Self {
        Self { ledger }
    }

    /// Validate and admit a job. The returned id is the only handle the
    /// caller needs.
    pub async fn submit(
        &self,
        kind: JobKind,
        input_ref: Option<String>,
        params: JobParams,
    ) -> Result<JobId, DispatchError> {
        validate(kind, input_ref.as_deref(), &params)?;

        let job = Job {
            input_ref,
            ..Job::builder().kind(kind).params(params).build()
        };
        self.ledger.insert(&job).await?;

        info!(job_id = %job.id, kind = %kind, "job submitted");
        Ok(job.id)
    }

    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, DispatchError> {
        let record = self
            .ledger
            .get(job_id)
            .await?
            .ok_or(DispatchError::NotFound(job_id))?;

        Ok(JobStatus {
            job_id,
            kind: record.job.kind,
            state: record.state,
            progress: record.progress,
            result: record.result,
            error: record.error,
            submitted_at: record.job.submitted_at,
            updated_at: record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::types::article::DigitalArticle;

    fn pdf_params() -> JobParams {
        JobParams::new()
            .with_publication("Daily Bugle")
            .with_language("hi")
            .with_zone("North")
    }

    #[test]
    fn test_pdf_requires_input_and_metadata() {
        assert_eq!(
            validate(JobKind::PdfPipeline, None, &pdf_params()),
            Err(ValidationError::MissingField {
                kind: JobKind::PdfPipeline,
                field: "input_ref"
            })
        );
        assert_eq!(
            validate(JobKind::PdfPipeline, Some("in/a.pdf"), &JobParams::new()),
            Err(ValidationError::MissingField {
                kind: JobKind::PdfPipeline,
                field: "publication"
            })
        );
        assert!(validate(JobKind::PdfPipeline, Some("in/a.pdf"), &pdf_params()).is_ok());
    }

    #[test]
    fn test_crawl_pdf_requires_valid_date() {
        assert!(matches!(
            validate(JobKind::CrawlPdf, Some("in/a.pdf"), &pdf_params()),
            Err(ValidationError::MissingField { field: "date", .. })
        ));
        assert!(matches!(
            validate(
                JobKind::CrawlPdf,
                Some("in/a.pdf"),
                &pdf_params().with_date("2026-10-19")
            ),
            Err(ValidationError::InvalidField { field: "date", .. })
        ));
        assert!(validate(
            JobKind::CrawlPdf,
            Some("in/a.pdf"),
            &pdf_params().with_date("19-10-2026")
        )
        .is_ok());
    }

    #[test]
    fn test_digital_json_content_floor() {
        let short = JobParams::new()
            .with_language("en")
            .with_article(DigitalArticle::new("Title", "too short"));
        assert!(matches!(
            validate(JobKind::DigitalJson, None, &short),
            Err(ValidationError::InvalidField { field: "article", .. })
        ));

        let long = JobParams::new()
            .with_language("en")
            .with_article(DigitalArticle::new("Title", "x".repeat(50)));
        assert!(validate(JobKind::DigitalJson, None, &long).is_ok());

        let by_ref = JobParams::new().with_language("en");
        assert!(validate(JobKind::DigitalJson, Some("articles/1.json"), &by_ref).is_ok());
        assert!(matches!(
            validate(JobKind::DigitalJson, None, &by_ref),
            Err(ValidationError::MissingField { field: "article", .. })
        ));
    }

    #[test]
    fn test_direct_images_requires_keys() {
        assert!(matches!(
            validate(JobKind::DirectImages, None, &pdf_params()),
            Err(ValidationError::MissingField { field: "image_keys", .. })
        ));
        let params = pdf_params().with_image_keys(vec!["scans/page_1.jpg".into()]);
        assert!(validate(JobKind::DirectImages, None, &params).is_ok());
    }

    #[tokio::test]
    async fn test_rejected_submission_is_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(store.clone());

        let err = dispatcher
            .submit(JobKind::SingleImage, None, JobParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(store.job_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_then_status_is_pending() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(store);

        let id = dispatcher
            .submit(
                JobKind::SingleImage,
                Some("scans/front.jpg".into()),
                JobParams::new().with_language("en"),
            )
            .await
            .unwrap();

        let status = dispatcher.status(id).await.unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(status.kind, JobKind::SingleImage);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dispatcher = Dispatcher::new(Arc::new(MemoryStore::new()));
        let id = JobId::new();
        assert!(matches!(
            dispatcher.status(id).await,
            Err(DispatchError::NotFound(missing)) if missing == id
        ));
    }
}
