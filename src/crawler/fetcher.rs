//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the session's HTTP client with a proper user agent string
//! - GET requests with a per-request timeout and a redirect limit
//! - Bounded retries with exponential backoff
//! - Error classification by message inspection

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::storage::ErrorCategory;
use reqwest::{redirect::Policy, Client};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use url::Url;

/// Redirect hops followed before a request fails
pub const MAX_REDIRECTS: usize = 10;

/// A response that made it back, whatever its content type
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status_code: u16,
    /// Content-Type header value, empty when absent
    pub content_type: String,
    /// Response headers, keys lowercased
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Body size in bytes
    pub size: u64,
    /// Time of the successful attempt
    pub response_time_ms: u64,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// A URL whose retry budget ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub category: ErrorCategory,
    pub message: String,
    /// Status of the last attempt, if a response came back at all
    pub status_code: Option<u16>,
    pub attempts: u32,
}

impl FetchFailure {
    fn from_message(message: String, status_code: Option<u16>) -> Self {
        Self {
            category: categorize_error(&message),
            message,
            status_code,
            attempts: 1,
        }
    }

    fn from_reqwest(error: &reqwest::Error) -> Self {
        let mut message = error_chain(error);
        if error.is_timeout() && !message.to_lowercase().contains("timed out") {
            message = format!("request timed out: {}", message);
        }

        // The outer message carries the request URL, so only causes are inspected
        let causes = error.source().map(|e| error_chain(e)).unwrap_or_default();
        let category = if error.is_timeout() {
            ErrorCategory::Timeout
        } else {
            match categorize_error(&causes) {
                ErrorCategory::Network if error.is_connect() => ErrorCategory::Connection,
                category => category,
            }
        };

        Self {
            category,
            message,
            status_code: error.status().map(|s| s.as_u16()),
            attempts: 1,
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// The user agent has the form `CrawlerName/Version (+ContactURL; ContactEmail)`.
///
/// # Example
///
/// ```no_run
/// use sumi_seo::config::UserAgentConfig;
/// use sumi_seo::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiSeo".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Sends GET requests, retrying failed attempts with exponential backoff
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub fn new(client: Client, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            client,
            max_retries,
            retry_delay,
        }
    }

    /// Builds the client and retry policy from the session configuration
    pub fn from_config(
        crawler: &CrawlerConfig,
        user_agent: &UserAgentConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = build_http_client(user_agent, Duration::from_secs(crawler.timeout_secs))?;
        Ok(Self::new(
            client,
            crawler.max_retries,
            Duration::from_millis(crawler.retry_delay_ms),
        ))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Delay before retry number `attempt` (1-based): `retry_delay * 2^(attempt-1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_delay.saturating_mul(factor)
    }

    /// Fetches `url`, making at most `max_retries + 1` attempts
    ///
    /// HTTP status codes of 400 and above count as failed attempts. Permanent
    /// failures (not found, auth) share the same budget as transient ones.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(url).await {
                Ok(mut page) => {
                    page.attempts = attempt;
                    return Ok(page);
                }
                Err(failure) if attempt <= self.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt,
                        url,
                        failure.message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(mut failure) => {
                    failure.attempts = attempt;
                    return Err(failure);
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchedPage, FetchFailure> {
        let started = Instant::now();

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let message = format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            );
            return Err(FetchFailure::from_message(
                message.trim_end().to_string(),
                Some(status.as_u16()),
            ));
        }

        let final_url = response.url().clone();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let content_type = headers.get("content-type").cloned().unwrap_or_default();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            headers,
            size: bytes.len() as u64,
            body: String::from_utf8_lossy(&bytes).into_owned(),
            response_time_ms: started.elapsed().as_millis() as u64,
            attempts: 1,
        })
    }
}

/// Joins an error with its source chain: `outer: cause: root cause`
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Maps a failure message to an error category
///
/// HTTP status markers are checked first, then transport keywords. Anything
/// unrecognized is `network`.
pub fn categorize_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["http 401", "http 403"]) {
        return ErrorCategory::Auth;
    }
    if has(&["http 404", "http 410"]) {
        return ErrorCategory::NotFound;
    }
    if has(&["http 429", "too many requests"]) {
        return ErrorCategory::RateLimit;
    }
    if lower
        .find("http 5")
        .and_then(|i| lower.get(i + 5..i + 8))
        .is_some_and(|code| code.chars().all(|c| c.is_ascii_digit()))
    {
        return ErrorCategory::ServerError;
    }
    if has(&["timed out", "timeout", "deadline"]) {
        return ErrorCategory::Timeout;
    }
    if has(&[
        "dns error",
        "failed to lookup",
        "name or service not known",
        "nodename nor servname",
        "no such host",
        "name resolution",
    ]) {
        return ErrorCategory::Dns;
    }
    if has(&["certificate", "ssl", "tls", "handshake"]) {
        return ErrorCategory::Ssl;
    }
    if has(&["unauthorized", "forbidden"]) {
        return ErrorCategory::Auth;
    }
    if has(&[
        "connection refused",
        "connection reset",
        "connection closed",
        "connection aborted",
        "error trying to connect",
        "connect error",
    ]) {
        return ErrorCategory::Connection;
    }
    ErrorCategory::Network
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestCrawler".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn test_build_http_client() {
        let config = create_test_config();
        let client = build_http_client(&config, Duration::from_secs(5));
        assert!(client.is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        let client = build_http_client(&create_test_config(), Duration::from_secs(5)).unwrap();
        let fetcher = Fetcher::new(client, 3, Duration::from_millis(100));
        assert_eq!(fetcher.backoff(1), Duration::from_millis(100));
        assert_eq!(fetcher.backoff(2), Duration::from_millis(200));
        assert_eq!(fetcher.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_categorize_http_status() {
        assert_eq!(categorize_error("HTTP 401 Unauthorized"), ErrorCategory::Auth);
        assert_eq!(categorize_error("HTTP 403 Forbidden"), ErrorCategory::Auth);
        assert_eq!(categorize_error("HTTP 404 Not Found"), ErrorCategory::NotFound);
        assert_eq!(categorize_error("HTTP 410 Gone"), ErrorCategory::NotFound);
        assert_eq!(
            categorize_error("HTTP 429 Too Many Requests"),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            categorize_error("HTTP 503 Service Unavailable"),
            ErrorCategory::ServerError
        );
    }

    #[test]
    fn test_categorize_transport_errors() {
        assert_eq!(
            categorize_error("error sending request: operation timed out"),
            ErrorCategory::Timeout
        );
        assert_eq!(
            categorize_error("error trying to connect: dns error: failed to lookup address"),
            ErrorCategory::Dns
        );
        assert_eq!(
            categorize_error("error trying to connect: invalid peer certificate: UnknownIssuer"),
            ErrorCategory::Ssl
        );
        assert_eq!(
            categorize_error("error trying to connect: tcp connect error: Connection refused"),
            ErrorCategory::Connection
        );
        assert_eq!(categorize_error("something odd"), ErrorCategory::Network);
    }

    #[tokio::test]
    async fn test_url_path_does_not_pick_category() {
        let client = build_http_client(&create_test_config(), Duration::from_secs(5)).unwrap();
        let fetcher = Fetcher::new(client, 0, Duration::from_millis(1));

        for path in ["/plain", "/ssl-guide", "/timeout-help", "/dns-tips"] {
            let url = Url::parse(&format!("http://127.0.0.1:1{}", path)).unwrap();
            let failure = fetcher.fetch(&url).await.unwrap_err();
            assert_eq!(failure.category, ErrorCategory::Connection, "path {}", path);
            assert_eq!(failure.attempts, 1);
        }
    }

    #[test]
    fn test_server_error_needs_three_digits() {
        assert_eq!(categorize_error("http 5xx"), ErrorCategory::Network);
    }
}
