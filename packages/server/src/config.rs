use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use newsdesk::{PipelineConfig, SchedulerConfig, WorkerConfig, WorkerIdentity};

/// Process configuration loaded from environment variables.
///
/// Read once at startup and passed down by value; nothing reads the
/// environment after this.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Directory backing the filesystem object store
    pub object_store_root: PathBuf,
    /// Base URL under which stored objects are published
    pub object_store_public_url: Option<String>,
    pub converter_url: Option<String>,
    pub segmenter_url: Option<String>,
    pub analyzer_url: Option<String>,
    /// Crawler service that scrapes one site per request
    pub crawler_url: Option<String>,
    /// Result callback for kinds that notify
    pub callback_url: Option<String>,
    /// Where the crawl scheduler pushes articles
    pub gateway_url: Option<String>,
    /// JSON list of sites to crawl
    pub sites_file: PathBuf,
    pub worker_id: usize,
    pub total_workers: usize,
    pub page_concurrency: usize,
    pub article_concurrency: usize,
    pub max_jobs_per_worker: usize,
    pub memory_ceiling_mb: u64,
    pub lease_secs: u64,
    /// How often an idle worker replays parked callbacks
    pub redelivery_interval_secs: u64,
    pub crawl_interval_secs: u64,
    pub run_on_startup: bool,
    pub require_tags: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            object_store_root: env::var("OBJECT_STORE_ROOT")
                .unwrap_or_else(|_| "./objects".to_string())
                .into(),
            object_store_public_url: env::var("OBJECT_STORE_PUBLIC_URL").ok(),
            converter_url: env::var("CONVERTER_URL").ok(),
            segmenter_url: env::var("SEGMENTER_URL").ok(),
            analyzer_url: env::var("ANALYZER_URL").ok(),
            crawler_url: env::var("CRAWLER_URL").ok(),
            callback_url: env::var("CALLBACK_URL").ok(),
            gateway_url: env::var("GATEWAY_URL").ok(),
            sites_file: env::var("SITES_FILE")
                .unwrap_or_else(|_| "sites.json".to_string())
                .into(),
            worker_id: parse_var("WORKER_ID", 0)?,
            total_workers: parse_var("TOTAL_WORKERS", 1)?,
            page_concurrency: parse_var("PAGE_CONCURRENCY", 4)?,
            article_concurrency: parse_var("ARTICLE_CONCURRENCY", 8)?,
            max_jobs_per_worker: parse_var("MAX_JOBS_PER_WORKER", 50)?,
            memory_ceiling_mb: parse_var("MEMORY_CEILING_MB", 1500)?,
            lease_secs: parse_var("LEASE_SECS", 300)?,
            redelivery_interval_secs: parse_var("REDELIVERY_INTERVAL_SECS", 600)?,
            crawl_interval_secs: parse_var("CRAWL_INTERVAL_SECS", 2 * 3600)?,
            run_on_startup: parse_var("RUN_ON_STARTUP", true)?,
            require_tags: parse_var("REQUIRE_TAGS", false)?,
        })
    }

    /// Validated position in the scheduler pool.
    pub fn identity(&self) -> Result<WorkerIdentity> {
        WorkerIdentity::new(self.worker_id, self.total_workers)
            .context("WORKER_ID / TOTAL_WORKERS are inconsistent")
    }

    pub fn pipeline(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default()
            .with_page_concurrency(self.page_concurrency)
            .with_article_concurrency(self.article_concurrency)
            .with_require_tags(self.require_tags);
        if let Some(url) = &self.callback_url {
            config = config.with_default_callback_url(url.clone());
        }
        config
    }

    /// Worker settings. `worker_name` becomes the lease holder id.
    pub fn worker(&self, worker_name: impl Into<String>) -> WorkerConfig {
        let lease = Duration::from_secs(self.lease_secs);
        WorkerConfig {
            lease,
            heartbeat_interval: (lease / 5).max(Duration::from_secs(1)),
            max_jobs: self.max_jobs_per_worker,
            memory_ceiling_bytes: self.memory_ceiling_mb * 1024 * 1024,
            redelivery_interval: Duration::from_secs(self.redelivery_interval_secs),
            ..WorkerConfig::with_worker_id(worker_name)
        }
    }

    pub fn scheduler(&self) -> Result<SchedulerConfig> {
        let gateway = self
            .gateway_url
            .clone()
            .context("GATEWAY_URL must be set to run the crawl scheduler")?;
        Ok(SchedulerConfig::new(gateway)
            .with_interval(Duration::from_secs(self.crawl_interval_secs))
            .with_run_on_startup(self.run_on_startup))
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid {}", key, std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
