//! Robots.txt handling
//!
//! Only the boolean `respect-robots-txt` flag is supported: the start origin's
//! robots.txt is fetched once per session and consulted for every candidate link.

mod parser;

pub use parser::ParsedRobots;

use reqwest::Client;
use url::Url;

/// Fetches and parses `/robots.txt` of the origin of `start_url`
///
/// Any failure (network error, non-success status, unreadable body) yields an
/// allow-all policy; robots.txt never fails a session.
pub async fn fetch_robots(client: &Client, start_url: &Url) -> ParsedRobots {
    let robots_url = match start_url.join("/robots.txt") {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("Cannot build robots.txt URL for {}: {}", start_url, e);
            return ParsedRobots::allow_all();
        }
    };

    let response = match client.get(robots_url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Failed to fetch {}: {}", robots_url, e);
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        tracing::debug!("{} returned {}, allowing all", robots_url, response.status());
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => {
            tracing::info!("Loaded robots.txt from {}", robots_url);
            ParsedRobots::from_content(&body)
        }
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
