//! External collaborators called by the pipeline.
//!
//! Each call is a suspension point. Implementations classify their own
//! failures as transient (retry with backoff) or permanent.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DeliveryError, StageError};
use crate::partition::Site;
use crate::types::article::{AnalysisInput, ArticleAnalysis, DigitalArticle};
use crate::types::page::{PageImage, Segment};

/// Renders a document into ordered page images.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(
        &self,
        document: Bytes,
        dpi: u32,
        quality: u8,
    ) -> Result<Vec<PageImage>, StageError>;
}

/// Splits one page image into labeled regions.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, page: &PageImage) -> Result<Vec<Segment>, StageError>;
}

/// Reads, translates, summarizes, and tags one article.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, input: &AnalysisInput) -> Result<ArticleAnalysis, StageError>;
}

/// Blob storage for inputs and published article assets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `key`, returning a URL for the stored object.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str)
        -> Result<String, StageError>;

    async fn get(&self, key: &str) -> Result<Bytes, StageError>;
}

/// Delivers a JSON payload to an external endpoint.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn deliver(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

/// Fetches the current articles published by one site.
#[async_trait]
pub trait SiteFeed: Send + Sync {
    async fn fetch(&self, site: &Site) -> Result<Vec<DigitalArticle>, StageError>;
}
