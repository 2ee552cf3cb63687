//! Outbound link edges with DOM placement
//!
//! Every `<a href>` that is not a pseudo link (`#`, `mailto:`, `tel:`, `javascript:`)
//! yields exactly one edge. Repeated targets are kept as separate edges.

use super::FetchContext;
use crate::url::{extract_domain, is_internal_url, normalize_parsed, resolve_href};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anchor text is cut to this many characters
pub const ANCHOR_TEXT_MAX_CHARS: usize = 100;

/// Stored when an anchor has no visible text
pub const EMPTY_ANCHOR_TEXT: &str = "[no text]";

const NAVIGATION_KEYWORDS: &[&str] = &["nav", "menu", "header"];

/// Where on the page a link sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Navigation,
    Footer,
    Body,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Footer => "footer",
            Self::Body => "body",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "navigation" => Some(Self::Navigation),
            "footer" => Some(Self::Footer),
            "body" => Some(Self::Body),
            _ => None,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One anchor on one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub crawl_id: String,
    /// Normalized URL of the page the anchor is on
    pub source_url: String,
    /// Normalized absolute target
    pub target_url: String,
    pub anchor_text: String,
    pub is_internal: bool,
    /// Target host without `www.`; empty when the target has no host
    pub target_domain: String,
    pub placement: Placement,
    pub discovered_at: DateTime<Utc>,
}

/// Extracts one edge per qualifying anchor, in document order
pub fn extract_links(document: &Html, ctx: &FetchContext, crawl_id: &str) -> Vec<LinkEdge> {
    let Ok(anchor_selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&anchor_selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let target = resolve_href(href, &ctx.final_url)?;

            Some(LinkEdge {
                crawl_id: crawl_id.to_string(),
                source_url: ctx.url.clone(),
                is_internal: is_internal_url(&target, &ctx.base_domain),
                target_domain: extract_domain(&target).unwrap_or_default(),
                target_url: normalize_parsed(target),
                anchor_text: anchor_text(&anchor),
                placement: classify_placement(&anchor),
                discovered_at: ctx.crawled_at,
            })
        })
        .collect()
}

/// Trimmed, whitespace-collapsed anchor text, capped in length
fn anchor_text(anchor: &ElementRef<'_>) -> String {
    let text = anchor.text().collect::<Vec<_>>().join(" ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return EMPTY_ANCHOR_TEXT.to_string();
    }
    collapsed.chars().take(ANCHOR_TEXT_MAX_CHARS).collect()
}

/// Walks outward from the anchor's parent; the nearest matching ancestor decides
///
/// Within one ancestor a footer match is checked before a navigation match.
fn classify_placement(anchor: &ElementRef<'_>) -> Placement {
    for ancestor in anchor.ancestors().filter_map(ElementRef::wrap) {
        let element = ancestor.value();
        let name = element.name();
        let class = element.attr("class").unwrap_or_default().to_ascii_lowercase();
        let id = element.attr("id").unwrap_or_default().to_ascii_lowercase();

        if name == "footer" || class.contains("footer") || id.contains("footer") {
            return Placement::Footer;
        }

        let keyword_match = NAVIGATION_KEYWORDS
            .iter()
            .any(|keyword| class.contains(keyword) || id.contains(keyword));
        if name == "nav" || name == "header" || keyword_match {
            return Placement::Navigation;
        }
    }

    Placement::Body
}
