//! Extraction of SEO fields and outbound links from fetched HTML
//!
//! Both extractors are pure functions of (parsed document, fetch context): they never
//! perform I/O and return identical output for identical input.

mod content;
mod links;
mod page;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

pub use content::extract_page;
pub use links::{extract_links, LinkEdge, Placement, ANCHOR_TEXT_MAX_CHARS, EMPTY_ANCHOR_TEXT};
pub use page::{
    AnalyticsFlags, HeadingCounts, HreflangLink, ImageInfo, MicrodataItem, PageRecord,
    SecurityHeaders, MAX_IMAGES, MAX_SUBHEADINGS,
};

#[derive(Debug, Error)]
pub enum ExtractError {
    /// An assembled record broke its own invariants
    #[error("page record for {url} violates its shape: {reason}")]
    ShapeViolation { url: String, reason: String },
}

/// What the fetcher knows about a response, handed to the extractors
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Normalized URL the page is stored under
    pub url: String,

    /// URL after redirects; relative links resolve against it
    pub final_url: Url,

    pub status_code: Option<u16>,
    pub content_type: String,
    pub size: u64,
    pub response_time_ms: u64,
    pub depth: u32,
    pub is_internal: bool,

    /// Pages known to link here at fetch time
    pub linked_from: Vec<String>,

    /// Response headers, keys lowercased
    pub headers: BTreeMap<String, String>,

    /// Domain internal/external classification is relative to
    pub base_domain: String,

    pub crawled_at: DateTime<Utc>,
}

impl FetchContext {
    /// True when the response should be parsed as HTML
    ///
    /// A missing content type is treated as HTML.
    pub fn is_html(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.is_empty()
            || content_type.contains("text/html")
            || content_type.contains("application/xhtml")
    }
}
