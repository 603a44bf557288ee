//! Kernel module - process infrastructure and concrete collaborators.

pub mod deps;
pub mod fs_object_store;
pub mod http_stages;
pub mod scheduled_tasks;
pub mod sites;

pub use deps::{ServerDeps, Stores};
pub use fs_object_store::FsObjectStore;
pub use http_stages::{
    http_client, HttpAnalyzer, HttpCallbackSink, HttpConverter, HttpSegmenter, HttpSiteFeed,
};
pub use scheduled_tasks::start_crawl_scheduler;
pub use sites::load_sites;
