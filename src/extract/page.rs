//! The page record produced for every fetched URL

use super::{ExtractError, FetchContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// At most this many h2 and h3 texts are kept (each)
pub const MAX_SUBHEADINGS: usize = 10;

/// At most this many images are described in detail
pub const MAX_IMAGES: usize = 20;

/// Per-level heading counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingCounts {
    pub h1: usize,
    pub h2: usize,
    pub h3: usize,
    pub h4: usize,
    pub h5: usize,
    pub h6: usize,
}

impl HeadingCounts {
    pub fn increment(&mut self, level: u8) {
        match level {
            1 => self.h1 += 1,
            2 => self.h2 += 1,
            3 => self.h3 += 1,
            4 => self.h4 += 1,
            5 => self.h5 += 1,
            6 => self.h6 += 1,
            _ => {}
        }
    }

    pub fn total(&self) -> usize {
        self.h1 + self.h2 + self.h3 + self.h4 + self.h5 + self.h6
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Absolute source URL
    pub src: String,
    pub alt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HreflangLink {
    pub lang: String,
    pub href: String,
}

/// One `itemtype` element and its `itemprop` values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrodataItem {
    pub item_type: String,
    pub properties: BTreeMap<String, String>,
}

/// Tracking scripts detected in the raw HTML
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsFlags {
    pub google_analytics: bool,
    pub gtag: bool,
    pub google_tag_manager: bool,
    pub facebook_pixel: bool,
    pub hotjar: bool,
    pub mixpanel: bool,
    pub ga4_id: Option<String>,
    pub gtm_id: Option<String>,
}

/// Security-relevant response headers; None when absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityHeaders {
    pub strict_transport_security: Option<String>,
    pub content_security_policy: Option<String>,
    pub x_frame_options: Option<String>,
    pub x_content_type_options: Option<String>,
}

impl SecurityHeaders {
    /// Reads the four headers from a lowercase-keyed header map
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Self {
        let get = |name: &str| headers.get(name).cloned();
        Self {
            strict_transport_security: get("strict-transport-security"),
            content_security_policy: get("content-security-policy"),
            x_frame_options: get("x-frame-options"),
            x_content_type_options: get("x-content-type-options"),
        }
    }
}

/// Everything recorded about one URL
///
/// Every field has a safe default. Fetch failures and non-HTML responses still
/// produce a record; only the fetch metadata (and `error`) is filled in for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Normalized URL; the unique key
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status_code: Option<u16>,
    pub content_type: String,
    pub size: u64,
    pub response_time_ms: u64,
    pub depth: u32,
    pub is_internal: bool,
    pub linked_from: Vec<String>,

    pub title: String,
    pub title_length: usize,
    pub meta_description: String,
    pub meta_description_length: usize,
    pub h1: String,
    pub h1_count: usize,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
    pub word_count: usize,

    pub canonical_url: String,
    pub meta_robots: String,
    pub viewport: String,
    pub author: String,
    pub keywords: String,
    pub generator: String,
    pub theme_color: String,
    pub lang: String,
    pub charset: String,
    pub meta_tags: BTreeMap<String, String>,
    pub og_tags: BTreeMap<String, String>,
    pub twitter_tags: BTreeMap<String, String>,

    pub structured_data: Vec<serde_json::Value>,
    pub microdata: Vec<MicrodataItem>,

    pub heading_counts: HeadingCounts,
    pub heading_hierarchy: Vec<String>,
    pub heading_sequential_errors: Vec<String>,

    pub images: Vec<ImageInfo>,
    pub image_count: usize,
    pub images_without_alt: usize,

    pub internal_links: usize,
    pub external_links: usize,
    pub unsafe_target_blank: usize,
    pub protocol_relative_count: usize,
    pub hreflang: Vec<HreflangLink>,

    pub analytics: AnalyticsFlags,
    pub security_headers: SecurityHeaders,
    pub is_https: bool,

    pub crawled_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl PageRecord {
    /// A record carrying only fetch metadata; all SEO fields defaulted
    pub fn from_context(ctx: &FetchContext) -> Self {
        Self {
            url: ctx.url.clone(),
            final_url: ctx.final_url.to_string(),
            status_code: ctx.status_code,
            content_type: ctx.content_type.clone(),
            size: ctx.size,
            response_time_ms: ctx.response_time_ms,
            depth: ctx.depth,
            is_internal: ctx.is_internal,
            linked_from: ctx.linked_from.clone(),
            title: String::new(),
            title_length: 0,
            meta_description: String::new(),
            meta_description_length: 0,
            h1: String::new(),
            h1_count: 0,
            h2: Vec::new(),
            h3: Vec::new(),
            word_count: 0,
            canonical_url: String::new(),
            meta_robots: String::new(),
            viewport: String::new(),
            author: String::new(),
            keywords: String::new(),
            generator: String::new(),
            theme_color: String::new(),
            lang: String::new(),
            charset: String::new(),
            meta_tags: BTreeMap::new(),
            og_tags: BTreeMap::new(),
            twitter_tags: BTreeMap::new(),
            structured_data: Vec::new(),
            microdata: Vec::new(),
            heading_counts: HeadingCounts::default(),
            heading_hierarchy: Vec::new(),
            heading_sequential_errors: Vec::new(),
            images: Vec::new(),
            image_count: 0,
            images_without_alt: 0,
            internal_links: 0,
            external_links: 0,
            unsafe_target_blank: 0,
            protocol_relative_count: 0,
            hreflang: Vec::new(),
            analytics: AnalyticsFlags::default(),
            security_headers: SecurityHeaders::from_headers(&ctx.headers),
            is_https: ctx.final_url.scheme() == "https",
            crawled_at: ctx.crawled_at,
            error: None,
        }
    }

    /// A record for a URL whose fetch failed after all retries
    pub fn failed(ctx: &FetchContext, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::from_context(ctx)
        }
    }

    /// Checks the record's own shape contract
    ///
    /// # Errors
    ///
    /// Returns `ExtractError::ShapeViolation` naming the first broken rule.
    pub fn validate(&self) -> Result<(), ExtractError> {
        let violation = |reason: String| {
            Err(ExtractError::ShapeViolation {
                url: self.url.clone(),
                reason,
            })
        };

        if self.url.is_empty() {
            return violation("empty url".to_string());
        }
        if self.h2.len() > MAX_SUBHEADINGS || self.h3.len() > MAX_SUBHEADINGS {
            return violation(format!(
                "{} h2 / {} h3 entries exceed {}",
                self.h2.len(),
                self.h3.len(),
                MAX_SUBHEADINGS
            ));
        }
        if self.images.len() > MAX_IMAGES || self.images.len() > self.image_count {
            return violation(format!(
                "{} image entries for image count {}",
                self.images.len(),
                self.image_count
            ));
        }
        if self.images_without_alt > self.image_count {
            return violation(format!(
                "{} images without alt exceeds image count {}",
                self.images_without_alt, self.image_count
            ));
        }
        if self.heading_counts.total() != self.heading_hierarchy.len() {
            return violation(format!(
                "heading counts total {} but hierarchy has {}",
                self.heading_counts.total(),
                self.heading_hierarchy.len()
            ));
        }
        if self.h1_count != self.heading_counts.h1 {
            return violation(format!(
                "h1 count {} disagrees with heading counts {}",
                self.h1_count, self.heading_counts.h1
            ));
        }
        if self.title_length != self.title.chars().count()
            || self.meta_description_length != self.meta_description.chars().count()
        {
            return violation("length fields disagree with their text".to_string());
        }
        Ok(())
    }
}
