//! Crawler module for fetching and processing a site
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry logic
//! - Request scheduling with an adaptive worker limit
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod scheduler;

pub use coordinator::{
    generate_crawl_id, Coordinator, LinkBuffer, CONFIG_FILE, DATABASE_FILE, EXPORT_FILE,
    LINK_BATCH_SIZE, METADATA_SNAPSHOT_INTERVAL,
};
pub use fetcher::{
    build_http_client, categorize_error, FetchFailure, FetchedPage, Fetcher, MAX_REDIRECTS,
};
pub use scheduler::{EnqueueRefusal, QueuedUrl, Scheduler};

use crate::config::Config;
use crate::storage::CrawlMetadata;
use crate::SeoError;

/// Runs a complete crawl session
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Create the crawl directory, config document and database
/// 2. Seed the frontier with the start URL
/// 3. Fetch pages breadth-first on a bounded worker pool
/// 4. Extract page records and links, following accepted links
/// 5. Persist the terminal metadata record
///
/// # Errors
///
/// Only construction can fail (an unusable start URL). Once running, failures are
/// reported through the returned metadata's status.
///
/// # Example
///
/// ```no_run
/// use sumi_seo::config::load_config;
/// use sumi_seo::crawler::crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("crawl.toml"))?;
/// let metadata = crawl(config).await?;
/// println!("{}: {}", metadata.crawl_id, metadata.status);
/// # Ok(())
/// # }
/// ```
pub async fn crawl(config: Config) -> Result<CrawlMetadata, SeoError> {
    let coordinator = Coordinator::new(config)?;
    Ok(coordinator.run().await)
}
