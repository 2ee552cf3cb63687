//! URL handling module for Sumi-SEO
//!
//! This module provides URL normalization, internal/external classification and
//! resolution of raw `href`/`src` attribute values against a page URL.

mod domain;
mod normalize;

use url::Url;

// Re-export main functions
pub use domain::{extract_domain, is_internal, is_internal_url, strip_www};
pub use normalize::{normalize_parsed, normalize_url};

/// Prefixes of links that never point at a crawlable document
const PSEUDO_LINK_PREFIXES: &[&str] = &["#", "mailto:", "tel:", "javascript:"];

/// Returns true for fragment-only, `mailto:`, `tel:` and `javascript:` hrefs
pub fn is_pseudo_link(href: &str) -> bool {
    let href = href.trim();
    PSEUDO_LINK_PREFIXES.iter().any(|prefix| {
        href.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

/// Resolves an anchor `href` to an absolute http(s) URL without fragment
///
/// Returns None for pseudo links, unresolvable values, and non-HTTP schemes.
pub fn resolve_href(href: &str, base_url: &Url) -> Option<Url> {
    if is_pseudo_link(href) {
        return None;
    }

    let mut resolved = base_url.join(href.trim()).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Resolves a resource reference (image `src` and the like) to an absolute string
///
/// Protocol-relative (`//cdn.example.com/x.png`) and root-relative (`/img/x.png`)
/// forms are resolved against the page; anything unresolvable is returned trimmed.
pub fn resolve_resource(src: &str, base_url: &Url) -> String {
    let src = src.trim();
    if src.is_empty() {
        return String::new();
    }

    base_url
        .join(src)
        .map(|resolved| resolved.to_string())
        .unwrap_or_else(|_| src.to_string())
}
