//! One crawl cycle for this worker's share of the site list.
//!
//! A cycle first replays whatever the previous cycles parked, then crawls
//! each site in the share in order and pushes every article to the
//! destination. Deliveries that fail are parked for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::partition::{Site, WorkerShare};
use crate::pipeline::callback::deliver_or_park;
use crate::traits::spool::{redeliver, RetrySpool};
use crate::traits::stages::{CallbackSink, SiteFeed};
use crate::types::article::DigitalArticle;
use crate::types::config::RetryPolicy;
use crate::types::job::DIGITAL_MEDIA_ID;
use crate::types::result::DeliveryOutcome;
use crate::types::spool::RedeliveryReport;

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Where crawled articles are pushed
    pub destination: String,
    /// Time between cycles. Default: 2h.
    pub interval: Duration,
    /// Cap on sites crawled per cycle
    pub max_sites: Option<usize>,
    /// Run one cycle shortly after start instead of waiting a full interval
    pub run_on_startup: bool,
    /// Per-worker delay before the startup cycle, multiplied by `worker_id`
    pub startup_delay: Duration,
    /// Immediate retries per article before parking
    pub delivery_retry: RetryPolicy,
}

impl SchedulerConfig {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            interval: Duration::from_secs(2 * 3600),
            max_sites: None,
            run_on_startup: true,
            startup_delay: Duration::from_secs(30),
            delivery_retry: RetryPolicy::none(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_sites(mut self, max_sites: usize) -> Self {
        self.max_sites = Some(max_sites);
        self
    }

    pub fn with_run_on_startup(mut self, run: bool) -> Self {
        self.run_on_startup = run;
        self
    }

    pub fn with_delivery_retry(mut self, policy: RetryPolicy) -> Self {
        self.delivery_retry = policy;
        self
    }
}

/// Body pushed to the destination for one crawled article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledArticle {
    pub title: String,
    pub content: String,
    /// Site name
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    pub crawled_on: String,
    #[serde(rename = "mediaId")]
    pub media_id: u32,
}

impl CrawledArticle {
    fn from_site(site: &Site, article: DigitalArticle) -> Self {
        Self {
            title: article.title,
            content: article.content,
            source: article.source.unwrap_or_else(|| site.name.clone()),
            url: article.url,
            language: site.language.clone(),
            published_at: article.published_at,
            crawled_on: Utc::now().to_rfc3339(),
            media_id: DIGITAL_MEDIA_ID,
        }
    }
}

/// Tally of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub redelivered: RedeliveryReport,
    pub sites_crawled: usize,
    pub sites_failed: usize,
    pub delivered: usize,
    pub parked: usize,
    /// Articles with no content, never sent
    pub skipped: usize,
}

/// Crawls one worker's share and pushes the results.
pub struct CrawlCycle {
    feed: Arc<dyn SiteFeed>,
    sink: Arc<dyn CallbackSink>,
    spool: Arc<dyn RetrySpool>,
    share: WorkerShare,
    config: SchedulerConfig,
}

impl CrawlCycle {
    pub fn new(
        feed: Arc<dyn SiteFeed>,
        sink: Arc<dyn CallbackSink>,
        spool: Arc<dyn RetrySpool>,
        share: WorkerShare,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            feed,
            sink,
            spool,
            share,
            config,
        }
    }

    pub fn share(&self) -> &WorkerShare {
        &self.share
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one cycle. Only a spool outage is an error; a site that cannot
    /// be fetched is counted and skipped.
    pub async fn run(&self) -> Result<CycleReport> {
        let destination = self.config.destination.as_str();
        let mut report = CycleReport {
            redelivered: redeliver(self.spool.as_ref(), self.sink.as_ref(), destination).await?,
            ..Default::default()
        };

        if report.redelivered.delivered + report.redelivered.failed > 0 {
            info!(
                delivered = report.redelivered.delivered,
                still_parked = report.redelivered.failed,
                "replayed parked deliveries"
            );
        }

        let limit = self.config.max_sites.unwrap_or(usize::MAX);
        for site in self.share.sites.iter().take(limit) {
            let articles = match self.feed.fetch(site).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!(site = %site.name, url = %site.url, error = %e, "site crawl failed");
                    report.sites_failed += 1;
                    continue;
                }
            };
            report.sites_crawled += 1;
            debug!(site = %site.name, articles = articles.len(), "site crawled");

            for article in articles {
                if article.content.trim().is_empty() {
                    debug!(site = %site.name, title = %article.title, "skipping article without content");
                    report.skipped += 1;
                    continue;
                }

                let payload = serde_json::to_value(CrawledArticle::from_site(site, article))?;
                match deliver_or_park(
                    self.sink.as_ref(),
                    self.spool.as_ref(),
                    &self.config.delivery_retry,
                    destination,
                    payload,
                )
                .await?
                {
                    DeliveryOutcome::Delivered { .. } => report.delivered += 1,
                    _ => report.parked += 1,
                }
            }
        }

        info!(
            worker_id = self.share.identity.worker_id(),
            sites = report.sites_crawled,
            failed_sites = report.sites_failed,
            delivered = report.delivered,
            parked = report.parked,
            "crawl cycle finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{partition, WorkerIdentity};
    use crate::stores::MemoryStore;
    use crate::testing::{MockCallbackSink, MockSiteFeed};

    const GATEWAY: &str = "http://gateway/articles";

    fn sites() -> Vec<Site> {
        (0..4)
            .map(|i| Site::new(format!("s{}", i), format!("https://s{}.example", i)).with_language("en"))
            .collect()
    }

    fn body(n: usize) -> DigitalArticle {
        DigitalArticle::new(format!("Story {}", n), "Body text of the story")
    }

    fn cycle(
        feed: Arc<MockSiteFeed>,
        sink: Arc<MockCallbackSink>,
        store: Arc<MemoryStore>,
        config: SchedulerConfig,
    ) -> CrawlCycle {
        let share = partition(&sites(), WorkerIdentity::solo());
        CrawlCycle::new(feed, sink, store, share, config)
    }

    #[tokio::test]
    async fn test_failed_site_does_not_stop_others() {
        let feed = Arc::new(
            MockSiteFeed::new()
                .with_articles("s0", vec![body(1), body(2)])
                .failing_site("s1")
                .with_articles("s2", vec![body(3)]),
        );
        let sink = Arc::new(MockCallbackSink::new());
        let store = Arc::new(MemoryStore::new());

        let report = cycle(feed.clone(), sink.clone(), store, SchedulerConfig::new(GATEWAY))
            .run()
            .await
            .unwrap();

        assert_eq!(feed.calls(), vec!["s0", "s1", "s2", "s3"]);
        assert_eq!(report.sites_crawled, 3);
        assert_eq!(report.sites_failed, 1);
        assert_eq!(report.delivered, 3);

        let first = &sink.delivered()[0];
        assert_eq!(first["source"], "s0");
        assert_eq!(first["mediaId"], 2);
        assert_eq!(first["language"], "en");
    }

    #[tokio::test]
    async fn test_parked_articles_replay_next_cycle() {
        let feed = Arc::new(MockSiteFeed::new().with_articles("s0", vec![body(1)]));
        let sink = Arc::new(MockCallbackSink::new().down());
        let store = Arc::new(MemoryStore::new());
        let config = SchedulerConfig::new(GATEWAY).with_max_sites(1);

        let crawl = cycle(feed, sink.clone(), store.clone(), config);
        let first = crawl.run().await.unwrap();
        assert_eq!(first.parked, 1);
        assert_eq!(store.spool_count(), 1);

        sink.set_down(false);
        let second = crawl.run().await.unwrap();
        assert_eq!(second.redelivered.delivered, 1);
        assert_eq!(second.delivered, 1);
        assert_eq!(store.spool_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_articles_are_skipped() {
        let feed = Arc::new(
            MockSiteFeed::new().with_articles("s0", vec![DigitalArticle::new("Empty", "   ")]),
        );
        let sink = Arc::new(MockCallbackSink::new());
        let store = Arc::new(MemoryStore::new());

        let report = cycle(feed, sink.clone(), store, SchedulerConfig::new(GATEWAY))
            .run()
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(sink.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_max_sites_caps_the_share() {
        let feed = Arc::new(MockSiteFeed::new());
        let report = cycle(
            feed.clone(),
            Arc::new(MockCallbackSink::new()),
            Arc::new(MemoryStore::new()),
            SchedulerConfig::new(GATEWAY).with_max_sites(2),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.sites_crawled, 2);
        assert_eq!(feed.calls(), vec!["s0", "s1"]);
    }
}
