//! Flat CSV export of the pages table

use crate::extract::PageRecord;
use crate::storage::traits::{Storage, StorageResult};
use std::path::Path;

/// Header row of `pages.csv`
///
/// List and map fields are written as JSON text so every page stays on one row.
pub const PAGES_CSV_COLUMNS: &[&str] = &[
    "url",
    "final_url",
    "status_code",
    "content_type",
    "size",
    "response_time_ms",
    "depth",
    "is_internal",
    "linked_from",
    "title",
    "title_length",
    "meta_description",
    "meta_description_length",
    "h1",
    "h1_count",
    "h2",
    "h3",
    "word_count",
    "canonical_url",
    "meta_robots",
    "viewport",
    "lang",
    "charset",
    "og_tags",
    "twitter_tags",
    "structured_data_count",
    "heading_sequential_errors",
    "image_count",
    "images_without_alt",
    "internal_links",
    "external_links",
    "unsafe_target_blank",
    "protocol_relative_count",
    "hreflang_count",
    "ga4_id",
    "gtm_id",
    "is_https",
    "crawled_at",
    "error",
];

fn json_cell<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn page_row(page: &PageRecord) -> StorageResult<Vec<String>> {
    Ok(vec![
        page.url.clone(),
        page.final_url.clone(),
        page.status_code.map(|code| code.to_string()).unwrap_or_default(),
        page.content_type.clone(),
        page.size.to_string(),
        page.response_time_ms.to_string(),
        page.depth.to_string(),
        page.is_internal.to_string(),
        json_cell(&page.linked_from)?,
        page.title.clone(),
        page.title_length.to_string(),
        page.meta_description.clone(),
        page.meta_description_length.to_string(),
        page.h1.clone(),
        page.h1_count.to_string(),
        json_cell(&page.h2)?,
        json_cell(&page.h3)?,
        page.word_count.to_string(),
        page.canonical_url.clone(),
        page.meta_robots.clone(),
        page.viewport.clone(),
        page.lang.clone(),
        page.charset.clone(),
        json_cell(&page.og_tags)?,
        json_cell(&page.twitter_tags)?,
        page.structured_data.len().to_string(),
        json_cell(&page.heading_sequential_errors)?,
        page.image_count.to_string(),
        page.images_without_alt.to_string(),
        page.internal_links.to_string(),
        page.external_links.to_string(),
        page.unsafe_target_blank.to_string(),
        page.protocol_relative_count.to_string(),
        page.hreflang.len().to_string(),
        page.analytics.ga4_id.clone().unwrap_or_default(),
        page.analytics.gtm_id.clone().unwrap_or_default(),
        page.is_https.to_string(),
        page.crawled_at.to_rfc3339(),
        page.error.clone().unwrap_or_default(),
    ])
}

/// Writes every page, ordered by (depth, url), to `path`
///
/// Returns the number of data rows written.
pub fn export_pages_csv<S: Storage + ?Sized>(storage: &S, path: &Path) -> StorageResult<usize> {
    let pages = storage.list_pages()?;

    let mut writer = csv::WriterBuilder::new().from_path(path)?;
    writer.write_record(PAGES_CSV_COLUMNS)?;
    for page in &pages {
        writer.write_record(page_row(page)?)?;
    }
    writer.flush()?;

    Ok(pages.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FetchContext;
    use crate::storage::SqliteStorage;
    use chrono::Utc;
    use url::Url;

    fn page(url: &str, title: &str) -> PageRecord {
        let ctx = FetchContext {
            url: url.to_string(),
            final_url: Url::parse(url).unwrap(),
            status_code: Some(200),
            content_type: "text/html".to_string(),
            size: 10,
            response_time_ms: 1,
            depth: 0,
            is_internal: true,
            linked_from: Vec::new(),
            headers: Default::default(),
            base_domain: "example.com".to_string(),
            crawled_at: Utc::now(),
        };
        let mut record = PageRecord::from_context(&ctx);
        record.title = title.to_string();
        record.title_length = title.chars().count();
        record
    }

    #[test]
    fn test_row_matches_header_width() {
        let row = page_row(&page("https://example.com", "x")).unwrap();
        assert_eq!(row.len(), PAGES_CSV_COLUMNS.len());
    }

    #[test]
    fn test_export_escapes_delimiters() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .save_page(&page("https://example.com", "Hello, \"world\"\nagain"))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.csv");
        let written = export_pages_csv(&storage, &path).unwrap();
        assert_eq!(written, 1);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), PAGES_CSV_COLUMNS.len());

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0][9], "Hello, \"world\"\nagain");
    }
}
