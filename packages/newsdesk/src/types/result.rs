//! Aggregated job results and the callback payload built from them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::article::{ArticleOutcome, ArticleResult, Sentiment};
use crate::types::job::{JobId, JobKind};

/// A page whose segmentation gave up. It contributes no articles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_index: u32,
    pub error: String,
    pub attempts: u32,
}

/// What happened to the callback for this job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    #[default]
    NotRequested,
    Delivered { destination: String },
    /// No article was analyzed, so nothing was sent
    Skipped { destination: String },
    /// Delivery exhausted its retry budget; the payload waits in the spool
    Parked { destination: String, item_id: Uuid },
    /// Neither delivered nor parked; the result in the ledger is the only copy
    Failed { destination: String, error: String },
}

/// Final result payload of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// `DD-MM-YYYY`
    pub edition_date: String,
    pub total_pages: u32,
    /// Sorted by `(page_index, segment_index)`
    pub articles: Vec<ArticleResult>,
    #[serde(default)]
    pub page_failures: Vec<PageFailure>,
    /// Analyzed articles discarded for carrying no ministry tag
    #[serde(default)]
    pub dropped_untagged: u32,
    #[serde(default)]
    pub delivery: DeliveryOutcome,
}

impl JobResult {
    pub fn analyzed_count(&self) -> usize {
        self.articles.iter().filter(|a| !a.is_failed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.articles.iter().filter(|a| a.is_failed()).count()
    }
}

/// One article as the gateway expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackArticle {
    pub unique_article_id: String,
    #[serde(rename = "pagenumber")]
    pub page_number: u32,
    pub language: String,
    pub heading: String,
    pub content: String,
    pub english_heading: String,
    pub english_content: String,
    pub english_summary: String,
    pub sentiment: Sentiment,
    #[serde(rename = "ministryName")]
    pub ministry_name: String,
    #[serde(rename = "AdditionalMinistries", default)]
    pub additional_ministries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Body delivered to the callback destination. Failed articles are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "mediaId")]
    pub media_id: u32,
    pub publication: String,
    pub edition: String,
    #[serde(rename = "zoneName")]
    pub zone_name: String,
    pub language: String,
    pub date: String,
    pub articles: Vec<CallbackArticle>,
}

impl CallbackPayload {
    pub fn from_result(result: &JobResult) -> Self {
        let language = result.language.clone().unwrap_or_default();
        let articles = result
            .articles
            .iter()
            .filter_map(|a| match &a.outcome {
                ArticleOutcome::Analyzed {
                    analysis,
                    image_url,
                    ..
                } => {
                    let mut tags = analysis
                        .tags
                        .iter()
                        .filter(|t| !t.trim().is_empty())
                        .cloned();
                    let ministry_name = tags.next().unwrap_or_else(|| "Unknown".to_string());
                    Some(CallbackArticle {
                        unique_article_id: a.article_id.clone(),
                        page_number: a.key.page_index,
                        language: language.clone(),
                        heading: analysis.heading.clone(),
                        content: analysis.text.clone(),
                        english_heading: analysis
                            .translated_heading
                            .clone()
                            .unwrap_or_else(|| analysis.heading.clone()),
                        english_content: analysis
                            .translation
                            .clone()
                            .unwrap_or_else(|| analysis.text.clone()),
                        english_summary: analysis.summary.clone(),
                        sentiment: analysis.sentiment,
                        ministry_name,
                        additional_ministries: tags.collect(),
                        image_url: image_url.clone(),
                    })
                }
                ArticleOutcome::Failed { .. } => None,
            })
            .collect();

        Self {
            media_id: result.kind.media_id(),
            publication: result.publication.clone().unwrap_or_default(),
            edition: result.edition.clone().unwrap_or_default(),
            zone_name: result.zone.clone().unwrap_or_default(),
            language,
            date: result.edition_date.clone(),
            articles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::types::article::ArticleAnalysis;
    use crate::types::page::{ArticleKey, SegmentLabel};

    fn result_with(articles: Vec<ArticleResult>) -> JobResult {
        JobResult {
            job_id: JobId::new(),
            kind: JobKind::CrawlPdf,
            publication: Some("Daily Bugle".into()),
            edition: Some("City".into()),
            language: Some("hi".into()),
            zone: Some("North".into()),
            edition_date: "19-10-2026".into(),
            total_pages: 2,
            articles,
            page_failures: vec![],
            dropped_untagged: 0,
            delivery: DeliveryOutcome::NotRequested,
        }
    }

    #[test]
    fn test_payload_skips_failed_articles() {
        let analyzed = ArticleResult {
            key: ArticleKey::new(1, 0),
            article_id: "a".into(),
            label: SegmentLabel::Article,
            outcome: ArticleOutcome::Analyzed {
                analysis: ArticleAnalysis {
                    heading: "Heading".into(),
                    text: "Body".into(),
                    translation: Some("English body".into()),
                    tags: vec!["Health".into(), "Finance".into()],
                    ..Default::default()
                },
                image_url: Some("http://store/a.jpg".into()),
                analysis_url: None,
                upload_error: None,
            },
        };
        let failed = ArticleResult {
            key: ArticleKey::new(2, 0),
            article_id: "b".into(),
            label: SegmentLabel::Article,
            outcome: ArticleOutcome::Failed {
                stage: Stage::Analyze,
                error: "timeout".into(),
                attempts: 3,
            },
        };

        let payload = CallbackPayload::from_result(&result_with(vec![analyzed, failed]));
        assert_eq!(payload.articles.len(), 1);

        let article = &payload.articles[0];
        assert_eq!(article.ministry_name, "Health");
        assert_eq!(article.additional_ministries, vec!["Finance".to_string()]);
        assert_eq!(article.english_content, "English body");
        assert_eq!(article.english_heading, "Heading");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["mediaId"], 1);
        assert_eq!(json["zoneName"], "North");
        assert_eq!(json["articles"][0]["pagenumber"], 1);
        assert_eq!(json["articles"][0]["sentiment"], "NEUTRAL");
    }

    #[test]
    fn test_untagged_article_reports_unknown_ministry() {
        let analyzed = ArticleResult {
            key: ArticleKey::new(1, 0),
            article_id: "a".into(),
            label: SegmentLabel::Article,
            outcome: ArticleOutcome::Analyzed {
                analysis: ArticleAnalysis::default(),
                image_url: None,
                analysis_url: None,
                upload_error: None,
            },
        };
        let payload = CallbackPayload::from_result(&result_with(vec![analyzed]));
        assert_eq!(payload.articles[0].ministry_name, "Unknown");
    }

    #[test]
    fn test_digital_payload_uses_digital_media_id() {
        let mut result = result_with(vec![]);
        result.kind = JobKind::DigitalJson;

        let json = serde_json::to_value(CallbackPayload::from_result(&result)).unwrap();
        assert_eq!(json["mediaId"], 2);
        assert!(json["mediaId"].is_u64());
    }
}
