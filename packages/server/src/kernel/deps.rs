//! Process dependencies: storage backends and concrete collaborators.
//!
//! Everything the binaries hand to the library is built here from
//! [`Config`], behind the library's traits.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;

use newsdesk::{
    CallbackSink, Collaborators, JobLedger, PostgresStore, RetrySpool, SiteFeed, SqliteStore,
};

use crate::config::Config;
use crate::kernel::fs_object_store::FsObjectStore;
use crate::kernel::http_stages::{
    http_client, HttpAnalyzer, HttpCallbackSink, HttpConverter, HttpSegmenter, HttpSiteFeed,
};

/// Ledger and spool, both backed by the same database.
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn JobLedger>,
    pub spool: Arc<dyn RetrySpool>,
}

impl Stores {
    /// Connect to `database_url`. `postgres://` URLs select the Postgres
    /// backend; anything else is treated as SQLite.
    pub async fn connect(database_url: &str) -> Result<Self> {
        if is_postgres(database_url) {
            let store = Arc::new(
                PostgresStore::new(database_url)
                    .await
                    .context("Failed to connect to Postgres")?,
            );
            tracing::info!("Using Postgres job ledger");
            Ok(Self {
                ledger: store.clone(),
                spool: store,
            })
        } else {
            let store = Arc::new(
                SqliteStore::new(database_url)
                    .await
                    .context("Failed to open SQLite database")?,
            );
            tracing::info!("Using SQLite job ledger");
            Ok(Self {
                ledger: store.clone(),
                spool: store,
            })
        }
    }
}

fn is_postgres(database_url: &str) -> bool {
    database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")
}

/// Shared HTTP client plus the pieces built from config.
#[derive(Clone)]
pub struct ServerDeps {
    pub stores: Stores,
    pub http: Client,
    pub sink: Arc<dyn CallbackSink>,
}

impl ServerDeps {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let stores = Stores::connect(&config.database_url).await?;
        let http = http_client()?;
        let sink: Arc<dyn CallbackSink> = Arc::new(HttpCallbackSink::new(http.clone()));
        Ok(Self { stores, http, sink })
    }

    /// Collaborators for the document pipeline. Every service URL is
    /// required here, not only when a job first needs it.
    pub fn collaborators(&self, config: &Config) -> Result<Collaborators> {
        let converter_url = required(&config.converter_url, "CONVERTER_URL")?;
        let segmenter_url = required(&config.segmenter_url, "SEGMENTER_URL")?;
        let analyzer_url = required(&config.analyzer_url, "ANALYZER_URL")?;

        let mut objects = FsObjectStore::new(&config.object_store_root);
        if let Some(base) = &config.object_store_public_url {
            objects = objects.with_public_url(base.clone());
        }

        Ok(Collaborators {
            converter: Arc::new(HttpConverter::new(self.http.clone(), converter_url)),
            segmenter: Arc::new(HttpSegmenter::new(self.http.clone(), segmenter_url)),
            analyzer: Arc::new(HttpAnalyzer::new(self.http.clone(), analyzer_url)),
            objects: Arc::new(objects),
            sink: self.sink.clone(),
        })
    }

    pub fn site_feed(&self, config: &Config) -> Result<Arc<dyn SiteFeed>> {
        let crawler_url = required(&config.crawler_url, "CRAWLER_URL")?;
        Ok(Arc::new(HttpSiteFeed::new(self.http.clone(), crawler_url)))
    }
}

fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} must be set", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection() {
        assert!(is_postgres("postgres://localhost/newsdesk"));
        assert!(is_postgres("postgresql://localhost/newsdesk"));
        assert!(!is_postgres("sqlite://./newsdesk.db"));
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(&None, "CONVERTER_URL").is_err());
        assert!(required(&Some("  ".into()), "CONVERTER_URL").is_err());
        assert_eq!(
            required(&Some("http://convert".into()), "CONVERTER_URL").unwrap(),
            "http://convert"
        );
    }

    #[tokio::test]
    async fn test_sqlite_stores_share_one_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("newsdesk.db").display());

        let stores = Stores::connect(&url).await.unwrap();
        stores
            .spool
            .park("http://gateway", serde_json::json!({"n": 1}), "timeout")
            .await
            .unwrap();
        assert_eq!(stores.spool.pending("http://gateway").await.unwrap(), 1);
    }
}
