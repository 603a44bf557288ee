//! Article inputs, analysis output, and per-article results.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Stage;
use crate::types::page::{ArticleKey, BoundingBox, SegmentLabel};

/// An article that is already digital text (crawler output, `digital_json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalArticle {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

impl DigitalArticle {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            source: None,
            url: None,
            published_at: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// What the analyzer is asked to read.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisInput {
    /// A cropped region of a page image
    Image {
        key: ArticleKey,
        image: Bytes,
        bbox: BoundingBox,
        language: Option<String>,
    },
    /// Digital text
    Text {
        key: ArticleKey,
        title: String,
        content: String,
        language: Option<String>,
    },
}

impl AnalysisInput {
    pub fn key(&self) -> ArticleKey {
        match self {
            AnalysisInput::Image { key, .. } | AnalysisInput::Text { key, .. } => *key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// Structured output of the analysis collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ArticleAnalysis {
    #[serde(default)]
    pub heading: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_heading: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub sentiment: Sentiment,
    /// Ministry tags; `Unknown` means the analyzer found none
    #[serde(default)]
    pub tags: Vec<String>,
    /// Dates mentioned in the article, `DD-MM-YYYY`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dates: Vec<String>,
}

impl ArticleAnalysis {
    /// At least one tag other than `Unknown`.
    pub fn is_tagged(&self) -> bool {
        self.tags
            .iter()
            .any(|t| !t.trim().is_empty() && !t.eq_ignore_ascii_case("unknown"))
    }
}

/// How one article candidate ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArticleOutcome {
    Analyzed {
        analysis: ArticleAnalysis,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        analysis_url: Option<String>,
        /// Set when the analysis succeeded but persisting it did not
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upload_error: Option<String>,
    },
    /// Permanent-failure placeholder
    Failed {
        stage: Stage,
        error: String,
        attempts: u32,
    },
}

/// Output of the analysis stage for one article candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleResult {
    pub key: ArticleKey,
    pub article_id: String,
    pub label: SegmentLabel,
    #[serde(flatten)]
    pub outcome: ArticleOutcome,
}

impl ArticleResult {
    pub fn analysis(&self) -> Option<&ArticleAnalysis> {
        match &self.outcome {
            ArticleOutcome::Analyzed { analysis, .. } => Some(analysis),
            ArticleOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ArticleOutcome::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tag_is_untagged() {
        let mut analysis = ArticleAnalysis {
            tags: vec!["Unknown".into()],
            ..Default::default()
        };
        assert!(!analysis.is_tagged());

        analysis.tags.push("Ministry of Health".into());
        assert!(analysis.is_tagged());
    }

    #[test]
    fn test_failed_outcome_serializes_with_status() {
        let result = ArticleResult {
            key: ArticleKey::new(1, 2),
            article_id: "abc_p1_s2".into(),
            label: SegmentLabel::Article,
            outcome: ArticleOutcome::Failed {
                stage: Stage::Analyze,
                error: "timeout".into(),
                attempts: 3,
            },
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "analyze");
        assert_eq!(json["label"], "article");
        assert_eq!(json["key"]["page_index"], 1);
    }
}
