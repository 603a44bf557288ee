//! Pipeline configuration: pool widths, retry policies, and the pre-filter.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::page::{SegmentLabel, SegmentUnit};

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Labels that may reach analysis, each with a minimum confidence.
///
/// A segment whose label is not listed is never analyzed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreFilter {
    thresholds: BTreeMap<SegmentLabel, f32>,
}

impl Default for PreFilter {
    fn default() -> Self {
        Self::new().with_label(SegmentLabel::Article, 0.0)
    }
}

impl PreFilter {
    /// A filter that admits nothing.
    pub fn new() -> Self {
        Self {
            thresholds: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, label: SegmentLabel, min_confidence: f32) -> Self {
        self.thresholds.insert(label, min_confidence);
        self
    }

    pub fn threshold(&self, label: &SegmentLabel) -> Option<f32> {
        self.thresholds.get(label).copied()
    }

    pub fn admits(&self, segment: &SegmentUnit) -> bool {
        self.threshold(&segment.label)
            .is_some_and(|min| segment.confidence >= min)
    }
}

/// Configuration for the per-job pipeline.
///
/// Defaults are the documented deployment defaults; override per deployment
/// via the `with_*` methods.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pages segmented concurrently. Default: 4.
    pub page_concurrency: usize,

    /// Articles analyzed and uploaded concurrently. Independent of the page
    /// pool. Default: 8.
    pub article_concurrency: usize,

    /// Default: 3 attempts, 5s initial, x2, max 60s.
    pub conversion_retry: RetryPolicy,

    /// Default: 2 attempts, 1s initial.
    pub segmentation_retry: RetryPolicy,

    /// Default: 3 attempts, 2s initial, x2, max 60s.
    pub analysis_retry: RetryPolicy,

    /// Object store reads and writes. Default: 3 attempts, 1s initial, x2,
    /// max 30s.
    pub storage_retry: RetryPolicy,

    /// Inline callback attempts before the payload is parked. Kept short so
    /// the job's result is written promptly; the worker replays the spool
    /// for anything left undelivered. Default: 2 attempts, 1s initial.
    pub callback_retry: RetryPolicy,

    pub pre_filter: PreFilter,

    /// Render resolution. Default: 200.
    pub dpi: u32,

    /// JPEG quality. Default: 85.
    pub quality: u8,

    /// Drop analyzed articles without a ministry tag. Default: false.
    pub require_tags: bool,

    /// Destination for kinds that notify but carry no `callback_url`.
    pub default_callback_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_concurrency: 4,
            article_concurrency: 8,
            conversion_retry: RetryPolicy::new(3, Duration::from_secs(5)),
            segmentation_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            analysis_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            storage_retry: RetryPolicy::new(3, Duration::from_secs(1))
                .with_max_backoff(Duration::from_secs(30)),
            callback_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            pre_filter: PreFilter::default(),
            dpi: 200,
            quality: 85,
            require_tags: false,
            default_callback_url: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_page_concurrency(mut self, width: usize) -> Self {
        self.page_concurrency = width;
        self
    }

    pub fn with_article_concurrency(mut self, width: usize) -> Self {
        self.article_concurrency = width;
        self
    }

    pub fn with_conversion_retry(mut self, policy: RetryPolicy) -> Self {
        self.conversion_retry = policy;
        self
    }

    pub fn with_segmentation_retry(mut self, policy: RetryPolicy) -> Self {
        self.segmentation_retry = policy;
        self
    }

    pub fn with_analysis_retry(mut self, policy: RetryPolicy) -> Self {
        self.analysis_retry = policy;
        self
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    pub fn with_callback_retry(mut self, policy: RetryPolicy) -> Self {
        self.callback_retry = policy;
        self
    }

    pub fn with_pre_filter(mut self, filter: PreFilter) -> Self {
        self.pre_filter = filter;
        self
    }

    pub fn with_require_tags(mut self, require: bool) -> Self {
        self.require_tags = require;
        self
    }

    pub fn with_default_callback_url(mut self, url: impl Into<String>) -> Self {
        self.default_callback_url = Some(url.into());
        self
    }

    /// No backoff sleeps anywhere; for tests.
    pub fn without_backoff(mut self) -> Self {
        for policy in [
            &mut self.conversion_retry,
            &mut self.segmentation_retry,
            &mut self.analysis_retry,
            &mut self.storage_retry,
            &mut self.callback_retry,
        ] {
            policy.initial_backoff = Duration::ZERO;
        }
        self
    }
}
