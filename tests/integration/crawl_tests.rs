//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end, reading results back from the
//! session's SQLite database.

use std::path::Path;
use std::sync::Arc;
use sumi_seo::config::{parse_config, Config};
use sumi_seo::crawler::{Coordinator, DATABASE_FILE, EXPORT_FILE};
use sumi_seo::extract::Placement;
use sumi_seo::frontier::Frontier;
use sumi_seo::output::load_crawl_statistics;
use sumi_seo::storage::{ErrorCategory, SqliteStorage, Storage};
use sumi_seo::{CrawlMetadata, CrawlStatus};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration; `extra` is appended to the `[crawler]` table
fn create_test_config(start_url: &str, output: &Path, extra: &str) -> Config {
    let content = format!(
        r#"
[crawler]
start-url = "{start_url}"
crawl-id = "itest"
max-depth = 3
max-pages = 100
min-concurrency = 2
max-concurrency = 4
timeout-secs = 5
max-retries = 0
retry-delay-ms = 1
{extra}

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[output]
directory = "{output}"
export-csv = true
"#,
        start_url = start_url,
        extra = extra,
        output = output.display()
    );
    parse_config(&content).expect("test config should be valid")
}

fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html; charset=utf-8")
}

async fn mount_page(server: &MockServer, page_path: &str, body: impl Into<String>) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(html(body))
        .mount(server)
        .await;
}

/// Runs a crawl and reopens its database
async fn run_crawl(config: Config, output: &TempDir) -> (CrawlMetadata, SqliteStorage) {
    let metadata = Coordinator::new(config)
        .expect("Failed to create coordinator")
        .run()
        .await;
    let db_path = output.path().join("itest").join(DATABASE_FILE);
    let storage = SqliteStorage::new(&db_path).expect("Failed to open DB");
    (metadata, storage)
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        r#"<html lang="en"><head><title>Home</title></head><body>
        <nav><a href="/page1">Page 1</a></nav>
        <a href="/page2">Page 2</a>
        <footer><a href="/page1">Page 1 again</a></footer>
        </body></html>"#,
    )
    .await;
    mount_page(
        &mock_server,
        "/page1",
        "<html><head><title>Page 1</title></head><body><h1>One</h1>Content 1</body></html>",
    )
    .await;
    mount_page(
        &mock_server,
        "/page2",
        "<html><head><title>Page 2</title></head><body>Content 2</body></html>",
    )
    .await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "");
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.status, CrawlStatus::Completed);
    assert_eq!(metadata.stats.pages_crawled, 3);
    assert_eq!(metadata.stats.pages_failed, 0);
    assert_eq!(metadata.stats.max_depth_reached, 1);
    assert!(metadata.completed_at.is_some());

    let pages = storage.list_pages().unwrap();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].depth, 0);
    assert_eq!(pages[0].title, "Home");
    assert_eq!(pages[0].lang, "en");
    assert_eq!(pages[0].internal_links, 3);

    let page1 = storage
        .get_page(&format!("{}/page1", base_url))
        .unwrap()
        .expect("page1 should be stored");
    assert_eq!(page1.depth, 1);
    assert_eq!(page1.h1, "One");
    assert_eq!(page1.linked_from, vec![format!("{}/", base_url)]);

    assert_eq!(storage.count_links().unwrap(), 3);

    let persisted = storage.get_metadata("itest").unwrap().unwrap();
    assert_eq!(persisted.status, CrawlStatus::Completed);
    assert_eq!(persisted.stats.pages_crawled, 3);
    assert!(!persisted.config_hash.is_empty());

    let session_dir = output.path().join("itest");
    assert!(session_dir.join("config.toml").exists());
    assert!(session_dir.join(EXPORT_FILE).exists());
}

#[tokio::test]
async fn test_page_cap_leaves_unvisited_urls() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    let links: String = (0..50)
        .map(|i| format!(r#"<a href="/p{}">Page {}</a>"#, i, i))
        .collect();
    mount_page(
        &mock_server,
        "/",
        format!("<html><body>{}</body></html>", links),
    )
    .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d+$"))
        .respond_with(html("<html><body>leaf</body></html>"))
        .mount(&mock_server)
        .await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "")
        .with_max_pages(5);

    let frontier = Arc::new(Frontier::new("127.0.0.1"));
    let coordinator = Coordinator::with_frontier(config, Arc::clone(&frontier)).unwrap();
    let metadata = coordinator.run().await;

    assert_eq!(metadata.status, CrawlStatus::Completed);
    assert_eq!(metadata.stats.pages_crawled, 5);

    let storage =
        SqliteStorage::new(&output.path().join("itest").join(DATABASE_FILE)).unwrap();
    assert_eq!(storage.count_pages().unwrap(), 5);

    assert_eq!(frontier.discovered_count(), 51);
    assert_eq!(frontier.visited_count(), 5);
    assert!(!frontier.get_unvisited_urls().is_empty());
}

#[tokio::test]
async fn test_crawl_with_depth_limit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(&mock_server, "/", r#"<a href="/a">A</a>"#).await;
    mount_page(&mock_server, "/a", r#"<a href="/b">B</a>"#).await;
    mount_page(&mock_server, "/b", r#"<a href="/c">C</a>"#).await;
    mount_page(&mock_server, "/c", "end").await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "")
        .with_max_depth(1);
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.status, CrawlStatus::Completed);
    let pages = storage.list_pages().unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages.iter().all(|p| p.depth <= 1));
    assert!(storage
        .get_page(&format!("{}/b", base_url))
        .unwrap()
        .is_none());

    // The edge to /b is still recorded even though /b is never fetched
    assert_eq!(storage.count_links().unwrap(), 2);
    assert_eq!(metadata.stats.pages_skipped, 1);
}

#[tokio::test]
async fn test_title_equals_h1_is_queryable() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        r#"<html><head><title>A</title></head><body><h1>A</h1>
        <a href="/other">Other</a></body></html>"#,
    )
    .await;
    mount_page(
        &mock_server,
        "/other",
        "<html><head><title>Other</title></head><body><h1>Different</h1></body></html>",
    )
    .await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "");
    let (_, storage) = run_crawl(config, &output).await;

    let rows = storage
        .query(
            "SELECT url, title, h1 FROM pages WHERE title != '' AND title = h1",
            &[],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["url"], serde_json::json!(format!("{}/", base_url)));
    assert_eq!(rows[0]["title"], serde_json::json!("A"));
    assert_eq!(rows[0]["h1"], serde_json::json!("A"));
}

#[tokio::test]
async fn test_unsafe_target_blank_counted_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        r#"<html><body>
        <a href="https://external.example.org/x" target="_blank">Out</a>
        <a href="https://external.example.org/y" target="_blank" rel="noopener">Safe</a>
        <a href="/local" target="_blank">Local</a>
        </body></html>"#,
    )
    .await;
    mount_page(&mock_server, "/local", "local").await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "");
    let (metadata, storage) = run_crawl(config, &output).await;

    let home = storage
        .get_page(&format!("{}/", base_url))
        .unwrap()
        .unwrap();
    assert_eq!(home.unsafe_target_blank, 1);
    assert_eq!(home.external_links, 2);

    // External targets are recorded as edges but never fetched
    assert_eq!(metadata.stats.pages_crawled, 2);
    let external: Vec<_> = storage
        .list_links()
        .unwrap()
        .into_iter()
        .filter(|l| !l.is_internal)
        .collect();
    assert_eq!(external.len(), 2);
    assert!(external.iter().all(|l| l.target_domain == "external.example.org"));
}

#[tokio::test]
async fn test_placement_and_duplicate_edges() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        r#"<html><body>
        <nav><div class="footer-links"><a href="/t">Nested</a></div></nav>
        <header><a href="/t">Header</a></header>
        <main><a href="/t">Body one</a> <a href="/t">Body two</a> <a href="/t"></a></main>
        </body></html>"#,
    )
    .await;
    mount_page(&mock_server, "/t", "target").await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "");
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.stats.pages_crawled, 2);

    let links = storage.list_links().unwrap();
    assert_eq!(links.len(), 5);
    assert!(links
        .iter()
        .all(|l| l.target_url == format!("{}/t", base_url)));

    let placements: Vec<Placement> = links.iter().map(|l| l.placement).collect();
    assert_eq!(
        placements,
        vec![
            Placement::Footer,
            Placement::Navigation,
            Placement::Body,
            Placement::Body,
            Placement::Body
        ]
    );
    assert_eq!(links[4].anchor_text, "[no text]");

    let breakdown = storage.get_placement_breakdown().unwrap();
    assert_eq!(breakdown.get("body"), Some(&3));
    assert_eq!(breakdown.get("footer"), Some(&1));
    assert_eq!(breakdown.get("navigation"), Some(&1));
}

#[tokio::test]
async fn test_not_found_recorded_and_crawl_continues() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        r#"<a href="/missing">Missing</a><a href="/ok">Ok</a>"#,
    )
    .await;
    mount_page(&mock_server, "/ok", "<title>Ok</title>").await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(&format!("{}/", base_url), output.path(), "");
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.status, CrawlStatus::Completed);
    assert_eq!(metadata.stats.pages_crawled, 2);
    assert_eq!(metadata.stats.pages_failed, 1);

    let errors = storage.list_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::NotFound);
    assert_eq!(errors[0].url, format!("{}/missing", base_url));

    let missing = storage
        .get_page(&format!("{}/missing", base_url))
        .unwrap()
        .unwrap();
    assert_eq!(missing.status_code, Some(404));
    assert!(missing.error.is_some());

    let stats = load_crawl_statistics(&output.path().join("itest")).unwrap();
    assert_eq!(stats.error_summary.get("not_found"), Some(&1));
    assert_eq!(stats.successful_pages, 2);
}

#[tokio::test]
async fn test_retries_until_success() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // First attempt fails, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_page(&mock_server, "/", "<title>Back</title>").await;

    let output = TempDir::new().unwrap();
    let mut config = create_test_config(&format!("{}/", base_url), output.path(), "");
    config.crawler.max_retries = 2;
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.stats.pages_crawled, 1);
    assert_eq!(metadata.stats.pages_failed, 0);
    assert_eq!(storage.count_errors().unwrap(), 0);
    assert_eq!(
        storage
            .get_page(&format!("{}/", base_url))
            .unwrap()
            .unwrap()
            .title,
        "Back"
    );
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin"))
        .mount(&mock_server)
        .await;
    mount_page(
        &mock_server,
        "/",
        r#"<a href="/allowed">Allowed</a><a href="/admin">Admin</a>"#,
    )
    .await;
    mount_page(&mock_server, "/allowed", "allowed").await;
    mount_page(&mock_server, "/admin", "admin").await;

    let output = TempDir::new().unwrap();
    let config = create_test_config(
        &format!("{}/", base_url),
        output.path(),
        "respect-robots-txt = true",
    );
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.stats.pages_crawled, 2);
    assert_eq!(metadata.stats.pages_skipped, 1);
    assert!(storage
        .get_page(&format!("{}/admin", base_url))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_filters_and_non_html() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    mount_page(
        &mock_server,
        "/",
        r#"<a href="/doc.pdf">PDF</a>
        <a href="/private/area">Private</a>
        <a href="/data">Data</a>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"links": "<a href='/hidden'>x</a>"}"#, "application/json"),
        )
        .mount(&mock_server)
        .await;

    let output = TempDir::new().unwrap();
    let mut config = create_test_config(&format!("{}/", base_url), output.path(), "");
    config.filters.exclude_patterns = vec!["/private/".to_string()];
    let (metadata, storage) = run_crawl(config, &output).await;

    assert_eq!(metadata.stats.pages_crawled, 2);
    assert_eq!(metadata.stats.pages_skipped, 2);

    let data = storage
        .get_page(&format!("{}/data", base_url))
        .unwrap()
        .unwrap();
    assert!(data.content_type.starts_with("application/json"));
    assert_eq!(data.title, "");
    assert!(storage
        .get_page(&format!("{}/hidden", base_url))
        .unwrap()
        .is_none());
}

/// Small builders so tests read as "default config, but ..."
trait ConfigExt {
    fn with_max_pages(self, max_pages: u32) -> Self;
    fn with_max_depth(self, max_depth: u32) -> Self;
}

impl ConfigExt for Config {
    fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.crawler.max_pages = max_pages;
        self
    }

    fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.crawler.max_depth = max_depth;
        self
    }
}
