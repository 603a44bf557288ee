//! HTTP adapters for the external collaborators.
//!
//! Each service speaks JSON over POST. Images travel base64-encoded.
//! Failures are classified here so the pipeline's retry policy sees
//! transient vs permanent without knowing anything about HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use newsdesk::{
    AnalysisInput, Analyzer, ArticleAnalysis, BoundingBox, CallbackSink, Converter,
    DeliveryError, DigitalArticle, PageImage, Segment, Segmenter, Site, SiteFeed, Stage,
    StageError,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared client for all adapters.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

fn status_error(stage: Stage, status: StatusCode, body: &str) -> StageError {
    let message = format!("{} {}", status, body.trim());
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        StageError::transient(stage, message)
    } else {
        StageError::permanent(stage, message)
    }
}

fn transport_error(stage: Stage, error: reqwest::Error) -> StageError {
    // A body we cannot parse will not parse on retry either
    if error.is_decode() {
        StageError::permanent(stage, error.to_string())
    } else {
        StageError::transient(stage, error.to_string())
    }
}

fn decode_image(stage: Stage, encoded: &str) -> Result<Bytes, StageError> {
    BASE64
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| StageError::permanent(stage, format!("invalid base64 image: {}", e)))
}

async fn read_json<T: DeserializeOwned>(
    stage: Stage,
    response: reqwest::Response,
) -> Result<T, StageError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(stage, status, &body));
    }
    response.json().await.map_err(|e| transport_error(stage, e))
}

async fn post_json<Req, Resp>(
    client: &Client,
    url: &str,
    stage: Stage,
    body: &Req,
) -> Result<Resp, StageError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(stage, e))?;
    read_json(stage, response).await
}

// ============================================================================
// Converter
// ============================================================================

#[derive(Deserialize)]
struct ConvertResponse {
    /// Base64 page images in document order
    pages: Vec<String>,
}

/// Renders documents through the conversion service.
pub struct HttpConverter {
    client: Client,
    url: String,
}

impl HttpConverter {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Converter for HttpConverter {
    async fn convert(
        &self,
        document: Bytes,
        dpi: u32,
        quality: u8,
    ) -> Result<Vec<PageImage>, StageError> {
        debug!(bytes = document.len(), dpi, quality, "converting document");
        let response = self
            .client
            .post(&self.url)
            .query(&[("dpi", dpi.to_string()), ("quality", quality.to_string())])
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(document)
            .send()
            .await
            .map_err(|e| transport_error(Stage::Convert, e))?;

        let converted: ConvertResponse = read_json(Stage::Convert, response).await?;
        converted
            .pages
            .iter()
            .map(|page| decode_image(Stage::Convert, page).map(PageImage::new))
            .collect()
    }
}

// ============================================================================
// Segmenter
// ============================================================================

#[derive(Serialize)]
struct SegmentRequest {
    image: String,
}

#[derive(Deserialize)]
struct SegmentResponse {
    segments: Vec<WireSegment>,
}

#[derive(Deserialize)]
struct WireSegment {
    label: String,
    bbox: BoundingBox,
    #[serde(default = "full_confidence")]
    confidence: f32,
    #[serde(default)]
    crop: Option<String>,
}

fn full_confidence() -> f32 {
    1.0
}

impl WireSegment {
    fn into_segment(self) -> Result<Segment, StageError> {
        let mut segment =
            Segment::new(self.label, self.bbox).with_confidence(self.confidence);
        if let Some(crop) = self.crop {
            segment = segment.with_crop(decode_image(Stage::Segment, &crop)?);
        }
        Ok(segment)
    }
}

/// Splits pages into labeled regions through the segmentation service.
pub struct HttpSegmenter {
    client: Client,
    url: String,
}

impl HttpSegmenter {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Segmenter for HttpSegmenter {
    async fn segment(&self, page: &PageImage) -> Result<Vec<Segment>, StageError> {
        let request = SegmentRequest {
            image: BASE64.encode(&page.bytes),
        };
        let response: SegmentResponse =
            post_json(&self.client, &self.url, Stage::Segment, &request).await?;
        response
            .segments
            .into_iter()
            .map(WireSegment::into_segment)
            .collect()
    }
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum AnalyzeRequest<'a> {
    Image {
        article: String,
        image: String,
        bbox: BoundingBox,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<&'a str>,
    },
    Text {
        article: String,
        title: &'a str,
        content: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<&'a str>,
    },
}

impl<'a> From<&'a AnalysisInput> for AnalyzeRequest<'a> {
    fn from(input: &'a AnalysisInput) -> Self {
        match input {
            AnalysisInput::Image {
                key,
                image,
                bbox,
                language,
            } => AnalyzeRequest::Image {
                article: key.to_string(),
                image: BASE64.encode(image),
                bbox: *bbox,
                language: language.as_deref(),
            },
            AnalysisInput::Text {
                key,
                title,
                content,
                language,
            } => AnalyzeRequest::Text {
                article: key.to_string(),
                title,
                content,
                language: language.as_deref(),
            },
        }
    }
}

/// Reads and tags articles through the analysis service.
pub struct HttpAnalyzer {
    client: Client,
    url: String,
}

impl HttpAnalyzer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, input: &AnalysisInput) -> Result<ArticleAnalysis, StageError> {
        let request = AnalyzeRequest::from(input);
        post_json(&self.client, &self.url, Stage::Analyze, &request).await
    }
}

// ============================================================================
// Callback delivery
// ============================================================================

/// Posts result payloads to callback endpoints.
pub struct HttpCallbackSink {
    client: Client,
}

impl HttpCallbackSink {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn deliver(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Site feed
// ============================================================================

#[derive(Deserialize)]
struct CrawlResponse {
    #[serde(default)]
    articles: Vec<DigitalArticle>,
}

/// Asks the crawler service for one site's current articles.
pub struct HttpSiteFeed {
    client: Client,
    url: String,
}

impl HttpSiteFeed {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SiteFeed for HttpSiteFeed {
    async fn fetch(&self, site: &Site) -> Result<Vec<DigitalArticle>, StageError> {
        let response: CrawlResponse =
            post_json(&self.client, &self.url, Stage::Load, site).await?;
        Ok(response.articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk::ArticleKey;
    use serde_json::json;

    #[test]
    fn test_status_classification() {
        assert!(status_error(Stage::Analyze, StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(status_error(Stage::Analyze, StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(!status_error(Stage::Analyze, StatusCode::BAD_REQUEST, "").is_transient());
        assert!(!status_error(Stage::Analyze, StatusCode::NOT_FOUND, "").is_transient());
    }

    #[test]
    fn test_status_error_keeps_body() {
        let err = status_error(Stage::Convert, StatusCode::UNPROCESSABLE_ENTITY, " encrypted pdf\n");
        assert_eq!(err.stage(), Stage::Convert);
        assert_eq!(err.message(), "422 Unprocessable Entity encrypted pdf");
    }

    #[test]
    fn test_wire_segment_decodes_crop() {
        let wire: WireSegment = serde_json::from_value(json!({
            "label": "article",
            "bbox": {"x": 1, "y": 2, "width": 30, "height": 40},
            "crop": BASE64.encode(b"crop-bytes"),
        }))
        .unwrap();

        let segment = wire.into_segment().unwrap();
        assert_eq!(segment.label.as_str(), "article");
        assert_eq!(segment.confidence, 1.0);
        assert_eq!(segment.crop.as_deref(), Some(&b"crop-bytes"[..]));
    }

    #[test]
    fn test_bad_base64_is_permanent() {
        let err = decode_image(Stage::Segment, "not base64!").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_text_analysis_request_shape() {
        let input = AnalysisInput::Text {
            key: ArticleKey::new(1, 0),
            title: "Rains lash city".into(),
            content: "Heavy rain".into(),
            language: Some("en".into()),
        };

        let body = serde_json::to_value(AnalyzeRequest::from(&input)).unwrap();
        assert_eq!(
            body,
            json!({
                "kind": "text",
                "article": "p1s0",
                "title": "Rains lash city",
                "content": "Heavy rain",
                "language": "en",
            })
        );
    }

    #[test]
    fn test_crawl_response_tolerates_missing_articles() {
        let response: CrawlResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.articles.is_empty());
    }
}
