//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the pipeline, worker loop, and crawl
//! scheduler without a renderer, a segmentation model, an AI backend, or a
//! network.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{DeliveryError, Stage, StageError};
use crate::partition::Site;
use crate::traits::stages::{Analyzer, CallbackSink, Converter, ObjectStore, Segmenter, SiteFeed};
use crate::types::article::{AnalysisInput, ArticleAnalysis, DigitalArticle};
use crate::types::page::{ArticleKey, BoundingBox, PageImage, Segment};
use crate::worker::MemoryProbe;

/// Bytes the mock converter renders for 1-based page `n`.
pub fn page_bytes(n: u32) -> Bytes {
    Bytes::from(format!("page-{}", n))
}

/// A segment labeled `article` with a crop image.
pub fn article_segment(name: &str) -> Segment {
    Segment::new("article", BoundingBox::new(0, 0, 100, 100))
        .with_confidence(0.9)
        .with_crop(Bytes::from(format!("crop-{}", name)))
}

// ============================================================================
// Converter
// ============================================================================

/// Mock converter that renders a fixed number of pages.
///
/// Queued failures are returned first, one per call.
#[derive(Default)]
pub struct MockConverter {
    pages: u32,
    failures: Arc<RwLock<VecDeque<StageError>>>,
    always_fail: Option<StageError>,
    calls: Arc<RwLock<Vec<usize>>>,
}

impl MockConverter {
    /// Render `pages` pages per document.
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    /// Fail the next call with `error`. May be repeated.
    pub fn with_failure(self, error: StageError) -> Self {
        self.failures.write().unwrap().push_back(error);
        self
    }

    /// Fail every call.
    pub fn always_failing(mut self, error: StageError) -> Self {
        self.always_fail = Some(error);
        self
    }

    /// Document sizes of every call, in order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl Converter for MockConverter {
    async fn convert(
        &self,
        document: Bytes,
        _dpi: u32,
        _quality: u8,
    ) -> Result<Vec<PageImage>, StageError> {
        self.calls.write().unwrap().push(document.len());

        if let Some(error) = self.failures.write().unwrap().pop_front() {
            return Err(error);
        }
        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }

        Ok((1..=self.pages).map(|n| PageImage::new(page_bytes(n))).collect())
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// Mock segmenter keyed by page bytes.
///
/// Pages without explicit segments get the default list.
#[derive(Default)]
pub struct MockSegmenter {
    segments: Arc<RwLock<HashMap<Bytes, Vec<Segment>>>>,
    default_segments: Vec<Segment>,
    failing: Arc<RwLock<HashMap<Bytes, StageError>>>,
    calls: Arc<RwLock<Vec<Bytes>>>,
}

impl MockSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segments returned for any page without an explicit entry.
    pub fn with_default(mut self, segments: Vec<Segment>) -> Self {
        self.default_segments = segments;
        self
    }

    /// Segments returned for page `n` as rendered by [`MockConverter`].
    pub fn with_page(self, n: u32, segments: Vec<Segment>) -> Self {
        self.with_image(page_bytes(n), segments)
    }

    pub fn with_image(self, image: impl Into<Bytes>, segments: Vec<Segment>) -> Self {
        self.segments.write().unwrap().insert(image.into(), segments);
        self
    }

    /// Fail every call for page `n`.
    pub fn failing_page(self, n: u32, error: StageError) -> Self {
        self.failing.write().unwrap().insert(page_bytes(n), error);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Calls made for page `n`.
    pub fn calls_for_page(&self, n: u32) -> usize {
        let bytes = page_bytes(n);
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|b| **b == bytes)
            .count()
    }
}

#[async_trait]
impl Segmenter for MockSegmenter {
    async fn segment(&self, page: &PageImage) -> Result<Vec<Segment>, StageError> {
        self.calls.write().unwrap().push(page.bytes.clone());

        if let Some(error) = self.failing.read().unwrap().get(&page.bytes) {
            return Err(error.clone());
        }

        Ok(self
            .segments
            .read()
            .unwrap()
            .get(&page.bytes)
            .cloned()
            .unwrap_or_else(|| self.default_segments.clone()))
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Mock analyzer that echoes the article key into a deterministic analysis.
#[derive(Default)]
pub struct MockAnalyzer {
    analyses: Arc<RwLock<HashMap<ArticleKey, ArticleAnalysis>>>,
    failing: Arc<RwLock<HashMap<ArticleKey, StageError>>>,
    flaky: Arc<RwLock<HashMap<ArticleKey, u32>>>,
    delays: Arc<RwLock<HashMap<ArticleKey, Duration>>>,
    tags: Vec<String>,
    calls: Arc<RwLock<Vec<ArticleKey>>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            tags: vec!["Health".to_string()],
            ..Default::default()
        }
    }

    /// Tags attached to generated analyses.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_analysis(self, key: ArticleKey, analysis: ArticleAnalysis) -> Self {
        self.analyses.write().unwrap().insert(key, analysis);
        self
    }

    /// Fail every call for `key`.
    pub fn failing(self, key: ArticleKey, error: StageError) -> Self {
        self.failing.write().unwrap().insert(key, error);
        self
    }

    /// Fail the first `times` calls for `key` transiently.
    pub fn flaky(self, key: ArticleKey, times: u32) -> Self {
        self.flaky.write().unwrap().insert(key, times);
        self
    }

    /// Delay the response for `key`.
    pub fn with_delay(self, key: ArticleKey, delay: Duration) -> Self {
        self.delays.write().unwrap().insert(key, delay);
        self
    }

    pub fn calls(&self) -> Vec<ArticleKey> {
        self.calls.read().unwrap().clone()
    }

    pub fn calls_for(&self, key: ArticleKey) -> usize {
        self.calls.read().unwrap().iter().filter(|k| **k == key).count()
    }

    fn generated(&self, input: &AnalysisInput) -> ArticleAnalysis {
        let (heading, text) = match input {
            AnalysisInput::Image { key, .. } => {
                (format!("Heading {}", key), format!("Text of {}", key))
            }
            AnalysisInput::Text { title, content, .. } => (title.clone(), content.clone()),
        };
        ArticleAnalysis {
            summary: format!("Summary: {}", heading),
            translation: Some(text.clone()),
            heading,
            text,
            tags: self.tags.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, input: &AnalysisInput) -> Result<ArticleAnalysis, StageError> {
        let key = input.key();
        self.calls.write().unwrap().push(key);

        let delay = self.delays.read().unwrap().get(&key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failing.read().unwrap().get(&key) {
            return Err(error.clone());
        }

        {
            let mut flaky = self.flaky.write().unwrap();
            if let Some(remaining) = flaky.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StageError::transient(Stage::Analyze, "rate limited"));
                }
            }
        }

        Ok(self
            .analyses
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.generated(input)))
    }
}

// ============================================================================
// Object store
// ============================================================================

/// In-memory object store. URLs are `memory://{key}`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    failing_puts: Arc<RwLock<HashSet<String>>>,
    fail_all_puts: bool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.objects.write().unwrap().insert(key.into(), bytes.into());
        self
    }

    /// Reject every write.
    pub fn failing_puts(mut self) -> Self {
        self.fail_all_puts = true;
        self
    }

    /// Reject writes whose key ends with `suffix`.
    pub fn failing_puts_ending_with(self, suffix: impl Into<String>) -> Self {
        self.failing_puts.write().unwrap().insert(suffix.into());
        self
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> Result<String, StageError> {
        let rejected = self.fail_all_puts
            || self
                .failing_puts
                .read()
                .unwrap()
                .iter()
                .any(|suffix| key.ends_with(suffix.as_str()));
        if rejected {
            return Err(StageError::permanent(Stage::Upload, format!("write to {} denied", key)));
        }

        self.objects.write().unwrap().insert(key.to_string(), bytes);
        Ok(format!("memory://{}", key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StageError> {
        self.objects
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StageError::permanent(Stage::Load, format!("no object at {}", key)))
    }
}

// ============================================================================
// Callback sink
// ============================================================================

/// Record of a delivery attempt.
#[derive(Debug, Clone)]
pub struct MockDelivery {
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub accepted: bool,
}

/// Mock callback endpoint. Rejects with status 503 while `down`.
#[derive(Default)]
pub struct MockCallbackSink {
    down: Arc<RwLock<bool>>,
    calls: Arc<RwLock<Vec<MockDelivery>>>,
}

impl MockCallbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start rejecting every delivery.
    pub fn down(self) -> Self {
        self.set_down(true);
        self
    }

    pub fn set_down(&self, down: bool) {
        *self.down.write().unwrap() = down;
    }

    pub fn calls(&self) -> Vec<MockDelivery> {
        self.calls.read().unwrap().clone()
    }

    /// Payloads the endpoint accepted.
    pub fn delivered(&self) -> Vec<serde_json::Value> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|d| d.accepted)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl CallbackSink for MockCallbackSink {
    async fn deliver(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let accepted = !*self.down.read().unwrap();
        self.calls.write().unwrap().push(MockDelivery {
            endpoint: endpoint.to_string(),
            payload: payload.clone(),
            accepted,
        });

        if accepted {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                endpoint: endpoint.to_string(),
                status: 503,
            })
        }
    }
}

// ============================================================================
// Site feed
// ============================================================================

/// Mock site feed with canned articles per site name.
#[derive(Default)]
pub struct MockSiteFeed {
    articles: Arc<RwLock<HashMap<String, Vec<DigitalArticle>>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockSiteFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(self, site: impl Into<String>, articles: Vec<DigitalArticle>) -> Self {
        self.articles.write().unwrap().insert(site.into(), articles);
        self
    }

    pub fn failing_site(self, site: impl Into<String>) -> Self {
        self.failing.write().unwrap().insert(site.into());
        self
    }

    /// Site names fetched, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }
}

#[async_trait]
impl SiteFeed for MockSiteFeed {
    async fn fetch(&self, site: &Site) -> Result<Vec<DigitalArticle>, StageError> {
        self.calls.write().unwrap().push(site.name.clone());

        if self.failing.read().unwrap().contains(&site.name) {
            return Err(StageError::transient(Stage::Load, format!("{} unreachable", site.url)));
        }

        Ok(self
            .articles
            .read()
            .unwrap()
            .get(&site.name)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Memory probe
// ============================================================================

/// Memory probe that reports a settable RSS.
#[derive(Default)]
pub struct FixedMemoryProbe {
    rss: Arc<AtomicU64>,
}

impl FixedMemoryProbe {
    pub fn new(rss_bytes: u64) -> Self {
        Self {
            rss: Arc::new(AtomicU64::new(rss_bytes)),
        }
    }

    pub fn set(&self, rss_bytes: u64) {
        self.rss.store(rss_bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn rss_bytes(&self) -> Option<u64> {
        Some(self.rss.load(Ordering::SeqCst))
    }
}
