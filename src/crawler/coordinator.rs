//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the session loop that coordinates all aspects of a crawl:
//! - Creating the crawl directory, config document and database
//! - Seeding the frontier and scheduling fetches on a bounded worker pool
//! - Extracting page records and link edges from each response
//! - Filtering discovered links and enqueueing new ones
//! - Periodic metadata snapshots and the final terminal record

use crate::config::{compute_config_hash, write_config, Config};
use crate::crawler::fetcher::{FetchFailure, FetchedPage, Fetcher};
use crate::crawler::scheduler::{EnqueueRefusal, QueuedUrl, Scheduler};
use crate::extract::{extract_links, extract_page, FetchContext, LinkEdge, PageRecord};
use crate::filter::{FilterDecision, LinkFilter};
use crate::frontier::Frontier;
use crate::robots::{fetch_robots, ParsedRobots};
use crate::state::CrawlStatus;
use crate::storage::{
    export_pages_csv, open_storage, CrawlError, CrawlMetadata, ErrorCategory, SqliteStorage,
    Storage,
};
use crate::url::{extract_domain, normalize_parsed};
use crate::{SeoError, UrlError};
use chrono::{DateTime, Utc};
use scraper::Html;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use url::Url;

/// Effective configuration document inside the crawl directory
pub const CONFIG_FILE: &str = "config.toml";

/// Database file inside the crawl directory
pub const DATABASE_FILE: &str = "crawl.db";

/// Flat export inside the crawl directory
pub const EXPORT_FILE: &str = "pages.csv";

/// Link edges buffered before a flush to storage
pub const LINK_BATCH_SIZE: usize = 100;

/// Processed pages between metadata snapshots
pub const METADATA_SNAPSHOT_INTERVAL: u64 = 10;

/// Default crawl identifier: `<host>_<YYYYmmdd_HHMMSS>`
///
/// Host characters that are not valid in a crawl id (IPv6 brackets and colons)
/// become `_`.
pub fn generate_crawl_id(host: &str, at: DateTime<Utc>) -> String {
    let host: String = host
        .trim_start_matches('.')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}", host, at.format("%Y%m%d_%H%M%S"))
}

/// Append buffer for link edges, drained in fixed-size batches
#[derive(Debug)]
pub struct LinkBuffer {
    edges: Mutex<Vec<LinkEdge>>,
    batch_size: usize,
}

impl LinkBuffer {
    pub fn new(batch_size: usize) -> Self {
        Self {
            edges: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
        }
    }

    /// Appends edges; returns the whole buffer once it reaches the batch size
    pub fn extend(&self, edges: Vec<LinkEdge>) -> Option<Vec<LinkEdge>> {
        let mut buffer = self.edges.lock().unwrap_or_else(|p| p.into_inner());
        buffer.extend(edges);
        if buffer.len() >= self.batch_size {
            Some(std::mem::take(&mut *buffer))
        } else {
            None
        }
    }

    /// Takes everything still buffered
    pub fn drain(&self) -> Vec<LinkEdge> {
        let mut buffer = self.edges.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *buffer)
    }

    pub fn len(&self) -> usize {
        self.edges.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resources owned by one running session; dropped on every exit path
struct Session<'a> {
    storage: &'a mut SqliteStorage,
    scheduler: Scheduler,
    filter: LinkFilter,
    robots: Option<ParsedRobots>,
    links: LinkBuffer,
    started: Instant,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Config,
    start_url: Url,
    session_dir: PathBuf,
    frontier: Arc<Frontier>,
    metadata: CrawlMetadata,
}

impl Coordinator {
    /// Creates a coordinator with a fresh frontier for the start URL's domain
    ///
    /// # Errors
    ///
    /// Fails if the start URL cannot be parsed or has no host.
    pub fn new(config: Config) -> Result<Self, SeoError> {
        let start_url = Url::parse(&config.crawler.start_url)?;
        let base_domain = extract_domain(&start_url).ok_or(UrlError::MissingHost)?;
        Self::with_frontier(config, Arc::new(Frontier::new(base_domain)))
    }

    /// Creates a coordinator that records its URL state in `frontier`
    pub fn with_frontier(config: Config, frontier: Arc<Frontier>) -> Result<Self, SeoError> {
        let start_url = Url::parse(&config.crawler.start_url)?;
        let host = start_url.host_str().ok_or(UrlError::MissingHost)?;

        let crawl_id = config
            .crawler
            .crawl_id
            .clone()
            .unwrap_or_else(|| generate_crawl_id(host, Utc::now()));
        let session_dir = Path::new(&config.output.directory).join(&crawl_id);
        let metadata = CrawlMetadata::new(crawl_id, normalize_parsed(start_url.clone()), "");

        Ok(Self {
            config,
            start_url,
            session_dir,
            frontier,
            metadata,
        })
    }

    pub fn crawl_id(&self) -> &str {
        &self.metadata.crawl_id
    }

    /// Directory holding the config document, database and export
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    pub fn metadata(&self) -> &CrawlMetadata {
        &self.metadata
    }

    /// Runs the session to a terminal state
    ///
    /// Never fails: a session-level error sets the status to `failed`, is recorded
    /// as a `session` error row, and the metadata is still persisted.
    pub async fn run(mut self) -> CrawlMetadata {
        let started = Instant::now();
        let mut storage = match self.open_session() {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!("Cannot open crawl session {}: {}", self.crawl_id(), e);
                self.fail(started.elapsed());
                return self.metadata;
            }
        };

        if let Err(e) = self.crawl(&mut storage).await {
            tracing::error!("Crawl {} failed: {}", self.crawl_id(), e);
            self.fail(started.elapsed());

            let error = CrawlError::new(
                self.crawl_id(),
                self.metadata.start_url.clone(),
                ErrorCategory::Session,
                e.to_string(),
            );
            if let Err(e) = storage.append_error(&error) {
                tracing::error!("Failed to record session error: {}", e);
            }
            if let Err(e) = storage.upsert_metadata(&self.metadata) {
                tracing::error!("Failed to persist final metadata: {}", e);
            }
        }

        self.metadata
    }

    /// Creates the crawl directory, writes the effective config, opens the database
    fn open_session(&mut self) -> Result<SqliteStorage, SeoError> {
        std::fs::create_dir_all(&self.session_dir)?;

        let mut effective = self.config.clone();
        effective.crawler.crawl_id = Some(self.metadata.crawl_id.clone());
        let config_path = self.session_dir.join(CONFIG_FILE);
        write_config(&effective, &config_path)?;
        self.metadata.config_hash = compute_config_hash(&config_path)?;

        Ok(open_storage(&self.session_dir.join(DATABASE_FILE))?)
    }

    async fn crawl(&mut self, storage: &mut SqliteStorage) -> Result<(), SeoError> {
        self.transition(CrawlStatus::Running)?;
        self.metadata.started_at = Utc::now();
        storage.upsert_metadata(&self.metadata)?;

        let crawler = &self.config.crawler;
        tracing::info!(
            "Starting crawl {} from {} (max depth {}, max pages {})",
            self.metadata.crawl_id,
            self.start_url,
            crawler.max_depth,
            crawler.max_pages
        );

        let fetcher = Arc::new(Fetcher::from_config(crawler, &self.config.user_agent)?);
        let filter = LinkFilter::new(
            &self.config.filters,
            self.frontier.base_domain(),
            crawler.crawl_external,
        )?;
        let robots = if crawler.respect_robots_txt {
            Some(fetch_robots(fetcher.client(), &self.start_url).await)
        } else {
            None
        };

        let mut session = Session {
            storage,
            scheduler: Scheduler::new(
                crawler.max_pages,
                crawler.min_concurrency,
                crawler.max_concurrency,
            ),
            filter,
            robots,
            links: LinkBuffer::new(LINK_BATCH_SIZE),
            started: Instant::now(),
        };

        let seed = normalize_parsed(self.start_url.clone());
        self.frontier.add_discovered(&seed, 0, None);
        session
            .scheduler
            .enqueue(QueuedUrl {
                url: self.start_url.clone(),
                key: seed,
                depth: 0,
            })
            .map_err(|refusal| SeoError::Session(format!("cannot seed frontier: {:?}", refusal)))?;

        if let Err(e) = self.drive(&mut session, &fetcher).await {
            self.abandon(&mut session);
            return Err(e);
        }
        self.complete(&mut session)
    }

    /// Runs the fetch loop until nothing is queued or in flight
    async fn drive(
        &mut self,
        session: &mut Session<'_>,
        fetcher: &Arc<Fetcher>,
    ) -> Result<(), SeoError> {
        let mut tasks: JoinSet<(QueuedUrl, Result<FetchedPage, FetchFailure>)> = JoinSet::new();
        loop {
            while let Some(queued) = session.scheduler.next_ready() {
                let fetcher = Arc::clone(fetcher);
                tasks.spawn(async move {
                    let result = fetcher.fetch(&queued.url).await;
                    (queued, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (queued, result) = joined?;

            match result {
                Ok(page) => {
                    session.scheduler.record_success();
                    self.process_page(session, &queued, page)?;
                }
                Err(failure) => {
                    if failure.category.is_throttling() {
                        session.scheduler.record_throttle();
                    }
                    self.record_failure(session, &queued, failure)?;
                }
            }

            let stats = &self.metadata.stats;
            let processed = stats.pages_crawled + stats.pages_failed;
            if processed % METADATA_SNAPSHOT_INTERVAL == 0 {
                self.snapshot(session)?;
            }
        }

        Ok(())
    }

    /// Handles one successful response; never suspends
    fn process_page(
        &mut self,
        session: &mut Session<'_>,
        queued: &QueuedUrl,
        page: FetchedPage,
    ) -> Result<(), SeoError> {
        self.frontier.mark_visited(&queued.key);

        let ctx = self.fetch_context(
            queued,
            page.final_url,
            Some(page.status_code),
            page.content_type,
            page.headers,
        );
        let ctx = FetchContext {
            size: page.size,
            response_time_ms: page.response_time_ms,
            ..ctx
        };

        let (record, edges) = if ctx.is_html() {
            let document = Html::parse_document(&page.body);
            let edges = extract_links(&document, &ctx, &self.metadata.crawl_id);
            let record = match extract_page(&document, &page.body, &ctx) {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!("{}", e);
                    session.storage.append_error(&CrawlError::new(
                        self.crawl_id(),
                        ctx.url.clone(),
                        ErrorCategory::Extraction,
                        e.to_string(),
                    ))?;
                    PageRecord::failed(&ctx, e.to_string())
                }
            };
            (record, edges)
        } else {
            tracing::debug!("{} is not HTML ({})", ctx.url, ctx.content_type);
            (PageRecord::from_context(&ctx), Vec::new())
        };

        for edge in &edges {
            self.admit_link(session, edge, queued.depth);
        }

        session.storage.save_page(&record)?;
        if let Some(batch) = session.links.extend(edges) {
            session.storage.append_links(&batch)?;
            tracing::debug!("Flushed {} link edges", batch.len());
        }

        session.scheduler.mark_done(&queued.key);
        let stats = &mut self.metadata.stats;
        stats.pages_crawled += 1;
        stats.max_depth_reached = stats.max_depth_reached.max(queued.depth);

        tracing::debug!(
            "Crawled {} (depth {}, {} ms, {} attempt(s))",
            queued.key,
            queued.depth,
            record.response_time_ms,
            page.attempts
        );
        Ok(())
    }

    /// Filters one extracted edge and registers its target in the frontier
    fn admit_link(&mut self, session: &mut Session<'_>, edge: &LinkEdge, depth: u32) {
        let stats = &mut self.metadata.stats;

        let Ok(target) = Url::parse(&edge.target_url) else {
            stats.pages_skipped += 1;
            return;
        };

        if let FilterDecision::Reject(reason) = session.filter.check(&target) {
            tracing::trace!("Skipping {}: {}", edge.target_url, reason);
            stats.pages_skipped += 1;
            return;
        }

        if let Some(robots) = &session.robots {
            if !robots.is_allowed(target.as_str(), &self.config.user_agent.crawler_name) {
                tracing::trace!("Skipping {}: disallowed by robots.txt", edge.target_url);
                stats.pages_skipped += 1;
                return;
            }
        }

        if depth >= self.config.crawler.max_depth {
            tracing::trace!("Skipping {}: beyond max depth", edge.target_url);
            stats.pages_skipped += 1;
            return;
        }

        let next_depth = depth + 1;
        if !self
            .frontier
            .add_discovered(&edge.target_url, next_depth, Some(&edge.source_url))
        {
            return;
        }

        let queued = QueuedUrl {
            url: target,
            key: edge.target_url.clone(),
            depth: next_depth,
        };
        match session.scheduler.enqueue(queued) {
            Ok(()) => {}
            Err(EnqueueRefusal::PageCap) => {
                tracing::trace!("Skipping {}: page cap reached", edge.target_url);
                stats.pages_skipped += 1;
            }
            Err(EnqueueRefusal::AlreadyScheduled) => {}
        }
    }

    /// Records a URL whose retry budget ran out; the session continues
    fn record_failure(
        &mut self,
        session: &mut Session<'_>,
        queued: &QueuedUrl,
        failure: FetchFailure,
    ) -> Result<(), SeoError> {
        self.frontier.mark_visited(&queued.key);
        tracing::warn!(
            "Failed to fetch {} after {} attempt(s) [{}]: {}",
            queued.key,
            failure.attempts,
            failure.category,
            failure.message
        );

        let ctx = self.fetch_context(
            queued,
            queued.url.clone(),
            failure.status_code,
            String::new(),
            BTreeMap::new(),
        );
        session.storage.append_error(&CrawlError::new(
            self.crawl_id(),
            ctx.url.clone(),
            failure.category,
            failure.message.clone(),
        ))?;
        session
            .storage
            .save_page(&PageRecord::failed(&ctx, failure.message))?;

        session.scheduler.mark_failed(&queued.key);
        self.metadata.stats.pages_failed += 1;
        Ok(())
    }

    fn fetch_context(
        &self,
        queued: &QueuedUrl,
        final_url: Url,
        status_code: Option<u16>,
        content_type: String,
        headers: BTreeMap<String, String>,
    ) -> FetchContext {
        FetchContext {
            url: queued.key.clone(),
            final_url,
            status_code,
            content_type,
            size: 0,
            response_time_ms: 0,
            depth: queued.depth,
            is_internal: self.frontier.is_internal(&queued.key),
            linked_from: self.frontier.get_source_pages(&queued.key),
            headers,
            base_domain: self.frontier.base_domain().to_string(),
            crawled_at: Utc::now(),
        }
    }

    fn refresh_stats(&mut self, elapsed: Duration) {
        let stats = &mut self.metadata.stats;
        stats.pages_discovered = self.frontier.discovered_count() as u64;
        stats.duration_secs = elapsed.as_secs_f64();
        stats.pages_per_second = if stats.duration_secs > 0.0 {
            stats.pages_crawled as f64 / stats.duration_secs
        } else {
            0.0
        };
        self.metadata.updated_at = Utc::now();
    }

    fn snapshot(&mut self, session: &mut Session<'_>) -> Result<(), SeoError> {
        self.refresh_stats(session.started.elapsed());
        session.storage.upsert_metadata(&self.metadata)?;

        let stats = &self.metadata.stats;
        tracing::info!(
            "Progress: {} crawled, {} failed, {} in flight, {} queued, {:.2} pages/sec",
            stats.pages_crawled,
            stats.pages_failed,
            session.scheduler.in_flight(),
            session.scheduler.queued(),
            stats.pages_per_second
        );
        Ok(())
    }

    fn complete(&mut self, session: &mut Session<'_>) -> Result<(), SeoError> {
        let remaining = session.links.drain();
        if !remaining.is_empty() {
            session.storage.append_links(&remaining)?;
        }

        if self.config.output.export_csv {
            let path = self.session_dir.join(EXPORT_FILE);
            let rows = export_pages_csv(&*session.storage, &path)?;
            tracing::info!("Exported {} pages to {}", rows, path.display());
        }

        self.refresh_stats(session.started.elapsed());
        self.transition(CrawlStatus::Completed)?;
        self.metadata.completed_at = Some(self.metadata.updated_at);
        session.storage.upsert_metadata(&self.metadata)?;

        let unvisited = self.frontier.get_unvisited_urls().len();
        let stats = &self.metadata.stats;
        tracing::info!(
            "Crawl {} completed: {} crawled, {} failed, {} skipped, {} discovered in {:.1}s",
            self.metadata.crawl_id,
            stats.pages_crawled,
            stats.pages_failed,
            stats.pages_skipped,
            stats.pages_discovered,
            stats.duration_secs
        );
        if unvisited > 0 {
            tracing::info!("{} discovered URLs were not visited", unvisited);
        }
        Ok(())
    }

    fn transition(&mut self, next: CrawlStatus) -> Result<(), SeoError> {
        let from = self.metadata.status;
        if !from.can_transition_to(next) {
            return Err(SeoError::InvalidTransition { from, to: next });
        }
        self.metadata.status = next;
        self.metadata.updated_at = Utc::now();
        Ok(())
    }

    /// Moves to `failed` from whatever non-terminal state the session is in
    /// Writes out whatever links are still buffered, logging rather than failing
    fn abandon(&mut self, session: &mut Session<'_>) {
        let remaining = session.links.drain();
        if remaining.is_empty() {
            return;
        }
        if let Err(e) = session.storage.append_links(&remaining) {
            tracing::error!("Failed to flush {} buffered links: {}", remaining.len(), e);
        }
    }

    fn fail(&mut self, elapsed: Duration) {
        self.refresh_stats(elapsed);
        if let Err(e) = self.transition(CrawlStatus::Failed) {
            tracing::error!("{}", e);
            return;
        }
        self.metadata.completed_at = Some(self.metadata.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::extract::Placement;
    use chrono::TimeZone;

    fn create_test_config(start_url: &str, directory: &Path) -> Config {
        let content = format!(
            r#"
[crawler]
start-url = "{}"
crawl-id = "unit"
max-retries = 0
retry-delay-ms = 1
timeout-secs = 2

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
directory = "{}"
export-csv = false
"#,
            start_url,
            directory.display()
        );
        parse_config(&content).unwrap()
    }

    fn edge(n: usize) -> LinkEdge {
        LinkEdge {
            crawl_id: "c".to_string(),
            source_url: "https://example.com/".to_string(),
            target_url: format!("https://example.com/{}", n),
            anchor_text: "x".to_string(),
            is_internal: true,
            target_domain: "example.com".to_string(),
            placement: Placement::Body,
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_crawl_id() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(generate_crawl_id("example.com", at), "example.com_20240305_070809");
        assert_eq!(generate_crawl_id("[::1]", at), "___1__20240305_070809");
    }

    #[test]
    fn test_link_buffer_flushes_at_batch_size() {
        let buffer = LinkBuffer::new(3);
        assert!(buffer.extend(vec![edge(1), edge(2)]).is_none());
        let batch = buffer.extend(vec![edge(3), edge(4)]).unwrap();
        assert_eq!(batch.len(), 4);
        assert!(buffer.is_empty());

        buffer.extend(vec![edge(5)]);
        assert_eq!(buffer.drain().len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_crawl_id_defaults_from_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config("https://www.example.com/start", dir.path());
        config.crawler.crawl_id = None;

        let coordinator = Coordinator::new(config).unwrap();
        assert!(coordinator.crawl_id().starts_with("www.example.com_"));
        assert_eq!(coordinator.frontier().base_domain(), "example.com");
        assert_eq!(coordinator.session_dir(), dir.path().join(coordinator.crawl_id()));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config("https://example.com/", dir.path());
        let mut coordinator = Coordinator::new(config).unwrap();

        assert!(matches!(
            coordinator.transition(CrawlStatus::Completed),
            Err(SeoError::InvalidTransition { .. })
        ));
        assert!(coordinator.transition(CrawlStatus::Running).is_ok());
    }

    #[tokio::test]
    async fn test_unopenable_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the output directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let config = create_test_config("https://example.com/", &blocker);

        let metadata = Coordinator::new(config).unwrap().run().await;
        assert_eq!(metadata.status, CrawlStatus::Failed);
        assert!(metadata.completed_at.is_some());
        assert!(metadata.stats.duration_secs > 0.0);
        assert_eq!(metadata.stats.pages_discovered, 0);
    }

    #[test]
    fn test_abandon_flushes_buffered_links() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config("https://example.com/", dir.path());
        let mut coordinator = Coordinator::new(config).unwrap();
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let filter = LinkFilter::new(&coordinator.config.filters, "example.com", false).unwrap();

        let mut session = Session {
            storage: &mut storage,
            scheduler: Scheduler::new(10, 1, 1),
            filter,
            robots: None,
            links: LinkBuffer::new(LINK_BATCH_SIZE),
            started: Instant::now(),
        };
        assert!(session.links.extend(vec![edge(1), edge(2)]).is_none());

        coordinator.abandon(&mut session);
        assert!(session.links.is_empty());
        drop(session);

        assert_eq!(storage.count_links().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_start_url_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let config = create_test_config("http://127.0.0.1:1/", dir.path());

        let coordinator = Coordinator::new(config).unwrap();
        let session_dir = coordinator.session_dir().to_path_buf();
        let metadata = coordinator.run().await;

        assert_eq!(metadata.status, CrawlStatus::Completed);
        assert_eq!(metadata.stats.pages_crawled, 0);
        assert_eq!(metadata.stats.pages_failed, 1);

        let storage = SqliteStorage::new(&session_dir.join(DATABASE_FILE)).unwrap();
        let errors = storage.list_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_ne!(errors[0].category, ErrorCategory::Session);
        assert!(session_dir.join(CONFIG_FILE).exists());
        assert_eq!(
            storage.get_metadata("unit").unwrap().unwrap().status,
            CrawlStatus::Completed
        );
    }
}
