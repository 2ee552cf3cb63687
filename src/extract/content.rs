//! HTML -> PageRecord
//!
//! Every field falls back to its default when the markup is missing or malformed.
//! Only a record that breaks its own shape after assembly is reported as an error.

use super::page::{
    AnalyticsFlags, HeadingCounts, HreflangLink, ImageInfo, MicrodataItem, PageRecord, MAX_IMAGES,
    MAX_SUBHEADINGS,
};
use super::{ExtractError, FetchContext};
use crate::url::{is_internal_url, is_pseudo_link, resolve_href, resolve_resource};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Elements whose text is never rendered
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("valid word pattern"));

static GOOGLE_ANALYTICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"google-analytics\.com/(?:analytics|ga|urchin)\.js|\bga\(\s*'create'")
        .expect("valid analytics pattern")
});
static GTAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"googletagmanager\.com/gtag/js|\bgtag\(").expect("valid gtag pattern")
});
static GTM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"googletagmanager\.com/(?:gtm\.js|ns\.html)").expect("valid gtm pattern")
});
static FACEBOOK_PIXEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"connect\.facebook\.net/[^'\x22]*fbevents\.js|\bfbq\(")
        .expect("valid pixel pattern")
});
static HOTJAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"static\.hotjar\.com|_hjSettings").expect("valid hotjar pattern"));
static MIXPANEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"cdn\.mxpnl\.com|mixpanel\.init\(").expect("valid mixpanel pattern"));
static GA4_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(G-[A-Z0-9]{6,12})\b").expect("valid GA4 id pattern"));
static GTM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(GTM-[A-Z0-9]{4,8})\b").expect("valid GTM id pattern"));

/// Builds the page record for an HTML response
///
/// `raw_html` is the unparsed body, scanned for analytics snippets that may sit in
/// inline scripts or comments.
///
/// # Errors
///
/// Returns `ExtractError::ShapeViolation` if the assembled record fails
/// [`PageRecord::validate`].
pub fn extract_page(
    document: &Html,
    raw_html: &str,
    ctx: &FetchContext,
) -> Result<PageRecord, ExtractError> {
    let mut record = PageRecord::from_context(ctx);

    record.title = first_text(document, "title");
    record.title_length = record.title.chars().count();
    record.h1 = first_text(document, "h1");

    extract_meta(document, ctx, &mut record);
    record.meta_description_length = record.meta_description.chars().count();

    record.h2 = select_all(document, "h2")
        .into_iter()
        .take(MAX_SUBHEADINGS)
        .map(element_text)
        .collect();
    record.h3 = select_all(document, "h3")
        .into_iter()
        .take(MAX_SUBHEADINGS)
        .map(element_text)
        .collect();
    extract_headings(document, &mut record);

    record.word_count = count_words(document);
    record.lang = document
        .root_element()
        .value()
        .attr("lang")
        .map(|lang| lang.trim().to_string())
        .unwrap_or_default();

    record.structured_data = extract_json_ld(document);
    record.microdata = extract_microdata(document);

    extract_images(document, ctx, &mut record);
    extract_link_metrics(document, ctx, &mut record);
    record.hreflang = extract_hreflang(document, ctx);
    record.analytics = detect_analytics(raw_html);

    record.validate()?;
    Ok(record)
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn first_text(document: &Html, css: &str) -> String {
    select_all(document, css)
        .into_iter()
        .next()
        .map(element_text)
        .unwrap_or_default()
}

fn attr_trimmed(element: &ElementRef<'_>, name: &str) -> Option<String> {
    element.value().attr(name).map(|value| value.trim().to_string())
}

fn extract_meta(document: &Html, ctx: &FetchContext, record: &mut PageRecord) {
    for meta in select_all(document, "meta") {
        let content = attr_trimmed(&meta, "content").unwrap_or_default();

        if let Some(charset) = attr_trimmed(&meta, "charset") {
            if record.charset.is_empty() {
                record.charset = charset.to_ascii_lowercase();
            }
        }

        if let Some(name) = attr_trimmed(&meta, "name") {
            let name = name.to_ascii_lowercase();
            if let Some(key) = name.strip_prefix("twitter:") {
                record
                    .twitter_tags
                    .entry(key.to_string())
                    .or_insert_with(|| content.clone());
            }
            record.meta_tags.entry(name).or_insert_with(|| content.clone());
        }

        if let Some(property) = attr_trimmed(&meta, "property") {
            let property = property.to_ascii_lowercase();
            if let Some(key) = property.strip_prefix("og:") {
                record
                    .og_tags
                    .entry(key.to_string())
                    .or_insert_with(|| content.clone());
            } else if let Some(key) = property.strip_prefix("twitter:") {
                record
                    .twitter_tags
                    .entry(key.to_string())
                    .or_insert_with(|| content.clone());
            }
        }

        if record.charset.is_empty() {
            let is_content_type = attr_trimmed(&meta, "http-equiv")
                .is_some_and(|equiv| equiv.eq_ignore_ascii_case("content-type"));
            if is_content_type {
                if let Some(charset) = charset_param(&content) {
                    record.charset = charset;
                }
            }
        }
    }

    if record.charset.is_empty() {
        record.charset = charset_param(&ctx.content_type).unwrap_or_default();
    }

    let named = |name: &str| record.meta_tags.get(name).cloned().unwrap_or_default();
    let meta_description = named("description");
    let meta_robots = named("robots");
    let viewport = named("viewport");
    let author = named("author");
    let keywords = named("keywords");
    let generator = named("generator");
    let theme_color = named("theme-color");

    record.meta_description = meta_description;
    record.meta_robots = meta_robots;
    record.viewport = viewport;
    record.author = author;
    record.keywords = keywords;
    record.generator = generator;
    record.theme_color = theme_color;

    record.canonical_url = select_all(document, "link[rel][href]")
        .into_iter()
        .find(|link| has_rel(link, "canonical"))
        .and_then(|link| link.value().attr("href"))
        .map(|href| resolve_resource(href, &ctx.final_url))
        .unwrap_or_default();
}

/// `charset=...` parameter of a content-type value
fn charset_param(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let (_, rest) = lower.split_once("charset=")?;
    let charset = rest
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');
    (!charset.is_empty()).then(|| charset.to_string())
}

fn has_rel(element: &ElementRef<'_>, token: &str) -> bool {
    element
        .value()
        .attr("rel")
        .is_some_and(|rel| rel.split_whitespace().any(|t| t.eq_ignore_ascii_case(token)))
}

fn heading_level(element: &ElementRef<'_>) -> Option<u8> {
    let name = element.value().name();
    let digit = name.strip_prefix('h')?;
    match digit.parse::<u8>() {
        Ok(level @ 1..=6) => Some(level),
        _ => None,
    }
}

fn extract_headings(document: &Html, record: &mut PageRecord) {
    let mut counts = HeadingCounts::default();
    let mut hierarchy = Vec::new();
    let mut errors = Vec::new();
    let mut previous: Option<u8> = None;

    for heading in select_all(document, "h1, h2, h3, h4, h5, h6") {
        let Some(level) = heading_level(&heading) else {
            continue;
        };

        counts.increment(level);
        hierarchy.push(format!("h{}", level));

        // Forward skips only: h3 after h1 is an error, h1 after h3 is not
        if let Some(prev) = previous {
            if level > prev + 1 {
                errors.push(format!("h{} -> h{}", prev, level));
            }
        }
        previous = Some(level);
    }

    record.h1_count = counts.h1;
    record.heading_counts = counts;
    record.heading_hierarchy = hierarchy;
    record.heading_sequential_errors = errors;
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_element) = ElementRef::wrap(child) {
            if !INVISIBLE_ELEMENTS.contains(&child_element.value().name()) {
                collect_visible_text(child_element, out);
            }
        }
    }
}

fn count_words(document: &Html) -> usize {
    let Some(body) = select_all(document, "body").into_iter().next() else {
        return 0;
    };
    let mut text = String::new();
    collect_visible_text(body, &mut text);
    WORD.find_iter(&text).count()
}

fn extract_json_ld(document: &Html) -> Vec<serde_json::Value> {
    select_all(document, "script[type]")
        .into_iter()
        .filter(|script| {
            script
                .value()
                .attr("type")
                .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
        })
        // A block that fails to parse is dropped on its own
        .filter_map(|script| serde_json::from_str(element_text(script).as_str()).ok())
        .collect()
}

fn microdata_value(element: &ElementRef<'_>) -> String {
    let attr = match element.value().name() {
        "meta" => "content",
        "img" => "src",
        "a" | "link" => "href",
        _ => return element_text(*element),
    };
    attr_trimmed(element, attr).unwrap_or_default()
}

fn extract_microdata(document: &Html) -> Vec<MicrodataItem> {
    let Ok(itemprop) = Selector::parse("[itemprop]") else {
        return Vec::new();
    };

    select_all(document, "[itemtype]")
        .into_iter()
        .filter_map(|item| {
            let mut properties = BTreeMap::new();
            for prop in item.select(&itemprop) {
                let Some(name) = attr_trimmed(&prop, "itemprop") else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                properties
                    .entry(name)
                    .or_insert_with(|| microdata_value(&prop));
            }

            if properties.is_empty() {
                return None;
            }
            Some(MicrodataItem {
                item_type: attr_trimmed(&item, "itemtype").unwrap_or_default(),
                properties,
            })
        })
        .collect()
}

fn parse_dimension(element: &ElementRef<'_>, name: &str) -> Option<u32> {
    element.value().attr(name)?.trim().parse().ok()
}

fn extract_images(document: &Html, ctx: &FetchContext, record: &mut PageRecord) {
    let images = select_all(document, "img");

    record.image_count = images.len();
    record.images_without_alt = images
        .iter()
        .filter(|img| attr_trimmed(img, "alt").map_or(true, |alt| alt.is_empty()))
        .count();
    record.images = images
        .iter()
        .take(MAX_IMAGES)
        .map(|img| ImageInfo {
            src: resolve_resource(img.value().attr("src").unwrap_or_default(), &ctx.final_url),
            alt: attr_trimmed(img, "alt").unwrap_or_default(),
            width: parse_dimension(img, "width"),
            height: parse_dimension(img, "height"),
        })
        .collect();
}

fn extract_link_metrics(document: &Html, ctx: &FetchContext, record: &mut PageRecord) {
    for anchor in select_all(document, "a[href]") {
        let href = anchor.value().attr("href").unwrap_or_default();
        if is_pseudo_link(href) {
            continue;
        }
        let Some(target) = resolve_href(href, &ctx.final_url) else {
            continue;
        };

        if is_internal_url(&target, &ctx.base_domain) {
            record.internal_links += 1;
            continue;
        }
        record.external_links += 1;

        let opens_new_tab = anchor
            .value()
            .attr("target")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("_blank"));
        if opens_new_tab && !has_rel(&anchor, "noopener") && !has_rel(&anchor, "noreferrer") {
            record.unsafe_target_blank += 1;
        }
    }

    let references = [
        ("a[href]", "href"),
        ("script[src]", "src"),
        ("img[src]", "src"),
    ];
    let mut protocol_relative = references
        .iter()
        .flat_map(|(css, attr)| {
            select_all(document, css)
                .into_iter()
                .filter(move |element| is_protocol_relative(element.value().attr(attr)))
        })
        .count();
    protocol_relative += select_all(document, "link[href]")
        .into_iter()
        .filter(|link| has_rel(link, "stylesheet"))
        .filter(|link| is_protocol_relative(link.value().attr("href")))
        .count();
    record.protocol_relative_count = protocol_relative;
}

fn is_protocol_relative(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim_start().starts_with("//"))
}

fn extract_hreflang(document: &Html, ctx: &FetchContext) -> Vec<HreflangLink> {
    select_all(document, "link[hreflang][href]")
        .into_iter()
        .filter(|link| has_rel(link, "alternate"))
        .map(|link| HreflangLink {
            lang: attr_trimmed(&link, "hreflang").unwrap_or_default(),
            href: resolve_resource(link.value().attr("href").unwrap_or_default(), &ctx.final_url),
        })
        .collect()
}

fn first_capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn detect_analytics(raw_html: &str) -> AnalyticsFlags {
    let gtm_id = first_capture(&GTM_ID, raw_html);
    AnalyticsFlags {
        google_analytics: GOOGLE_ANALYTICS.is_match(raw_html),
        gtag: GTAG.is_match(raw_html),
        google_tag_manager: GTM.is_match(raw_html) || gtm_id.is_some(),
        facebook_pixel: FACEBOOK_PIXEL.is_match(raw_html),
        hotjar: HOTJAR.is_match(raw_html),
        mixpanel: MIXPANEL.is_match(raw_html),
        ga4_id: first_capture(&GA4_ID, raw_html),
        gtm_id,
    }
}
