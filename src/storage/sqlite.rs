//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::extract::{AnalyticsFlags, LinkEdge, PageRecord, Placement, SecurityHeaders};
use crate::state::CrawlStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{QueryRow, Storage, StorageError, StorageResult};
use crate::storage::{CrawlError, CrawlMetadata, CrawlStats, ErrorCategory};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Column order of the page insert; [`insert_page`] binds values in this order
const PAGE_COLUMNS: &[&str] = &[
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
    "author",
    "keywords",
    "generator",
    "theme_color",
    "lang",
    "charset",
    "meta_tags",
    "og_tags",
    "twitter_tags",
    "structured_data",
    "microdata",
    "heading_counts",
    "heading_hierarchy",
    "heading_sequential_errors",
    "images",
    "image_count",
    "images_without_alt",
    "internal_links",
    "external_links",
    "unsafe_target_blank",
    "protocol_relative_count",
    "hreflang",
    "has_google_analytics",
    "has_gtag",
    "has_google_tag_manager",
    "has_facebook_pixel",
    "has_hotjar",
    "has_mixpanel",
    "ga4_id",
    "gtm_id",
    "strict_transport_security",
    "content_security_policy",
    "x_frame_options",
    "x_content_type_options",
    "is_https",
    "crawled_at",
    "error",
];

static PAGE_INSERT_SQL: Lazy<String> = Lazy::new(|| {
    let placeholders: Vec<String> = (1..=PAGE_COLUMNS.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT OR REPLACE INTO pages ({}) VALUES ({})",
        PAGE_COLUMNS.join(", "),
        placeholders.join(", ")
    )
});

const METADATA_COLUMNS: &str = "crawl_id, start_url, status, started_at, completed_at, updated_at,
     config_hash, pages_discovered, pages_crawled, pages_failed, pages_skipped,
     max_depth_reached, duration_secs, pages_per_second";

const LINK_COLUMNS: &str = "crawl_id, source_url, target_url, anchor_text, is_internal,
     target_domain, placement, discovered_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (creating if needed) the database at `path` and brings its schema current
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// JSON text column; NULL or unparsable text reads as the default
fn json_column<T: DeserializeOwned + Default>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: Option<String> = row.get(column)?;
    Ok(raw
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default())
}

fn text_column(row: &Row<'_>, column: &str) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(column)?.unwrap_or_default())
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    parse_timestamp(&raw)
}

fn insert_page(conn: &Connection, page: &PageRecord) -> StorageResult<()> {
    let linked_from = to_json(&page.linked_from)?;
    let h2 = to_json(&page.h2)?;
    let h3 = to_json(&page.h3)?;
    let meta_tags = to_json(&page.meta_tags)?;
    let og_tags = to_json(&page.og_tags)?;
    let twitter_tags = to_json(&page.twitter_tags)?;
    let structured_data = to_json(&page.structured_data)?;
    let microdata = to_json(&page.microdata)?;
    let heading_counts = to_json(&page.heading_counts)?;
    let heading_hierarchy = to_json(&page.heading_hierarchy)?;
    let heading_sequential_errors = to_json(&page.heading_sequential_errors)?;
    let images = to_json(&page.images)?;
    let hreflang = to_json(&page.hreflang)?;
    let analytics = &page.analytics;
    let headers = &page.security_headers;

    let mut stmt = conn.prepare_cached(PAGE_INSERT_SQL.as_str())?;
    stmt.execute(params![
        page.url,
        page.final_url,
        page.status_code,
        page.content_type,
        page.size,
        page.response_time_ms,
        page.depth,
        page.is_internal,
        linked_from,
        page.title,
        page.title_length,
        page.meta_description,
        page.meta_description_length,
        page.h1,
        page.h1_count,
        h2,
        h3,
        page.word_count,
        page.canonical_url,
        page.meta_robots,
        page.viewport,
        page.author,
        page.keywords,
        page.generator,
        page.theme_color,
        page.lang,
        page.charset,
        meta_tags,
        og_tags,
        twitter_tags,
        structured_data,
        microdata,
        heading_counts,
        heading_hierarchy,
        heading_sequential_errors,
        images,
        page.image_count,
        page.images_without_alt,
        page.internal_links,
        page.external_links,
        page.unsafe_target_blank,
        page.protocol_relative_count,
        hreflang,
        analytics.google_analytics,
        analytics.gtag,
        analytics.google_tag_manager,
        analytics.facebook_pixel,
        analytics.hotjar,
        analytics.mixpanel,
        analytics.ga4_id,
        analytics.gtm_id,
        headers.strict_transport_security,
        headers.content_security_policy,
        headers.x_frame_options,
        headers.x_content_type_options,
        page.is_https,
        page.crawled_at.to_rfc3339(),
        page.error,
    ])?;
    Ok(())
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        url: row.get("url")?,
        final_url: text_column(row, "final_url")?,
        status_code: row.get("status_code")?,
        content_type: text_column(row, "content_type")?,
        size: row.get("size")?,
        response_time_ms: row.get("response_time_ms")?,
        depth: row.get("depth")?,
        is_internal: row.get("is_internal")?,
        linked_from: json_column(row, "linked_from")?,
        title: text_column(row, "title")?,
        title_length: row.get("title_length")?,
        meta_description: text_column(row, "meta_description")?,
        meta_description_length: row.get("meta_description_length")?,
        h1: text_column(row, "h1")?,
        h1_count: row.get("h1_count")?,
        h2: json_column(row, "h2")?,
        h3: json_column(row, "h3")?,
        word_count: row.get("word_count")?,
        canonical_url: text_column(row, "canonical_url")?,
        meta_robots: text_column(row, "meta_robots")?,
        viewport: text_column(row, "viewport")?,
        author: text_column(row, "author")?,
        keywords: text_column(row, "keywords")?,
        generator: text_column(row, "generator")?,
        theme_color: text_column(row, "theme_color")?,
        lang: text_column(row, "lang")?,
        charset: text_column(row, "charset")?,
        meta_tags: json_column(row, "meta_tags")?,
        og_tags: json_column(row, "og_tags")?,
        twitter_tags: json_column(row, "twitter_tags")?,
        structured_data: json_column(row, "structured_data")?,
        microdata: json_column(row, "microdata")?,
        heading_counts: json_column(row, "heading_counts")?,
        heading_hierarchy: json_column(row, "heading_hierarchy")?,
        heading_sequential_errors: json_column(row, "heading_sequential_errors")?,
        images: json_column(row, "images")?,
        image_count: row.get("image_count")?,
        images_without_alt: row.get("images_without_alt")?,
        internal_links: row.get("internal_links")?,
        external_links: row.get("external_links")?,
        unsafe_target_blank: row.get("unsafe_target_blank")?,
        protocol_relative_count: row.get("protocol_relative_count")?,
        hreflang: json_column(row, "hreflang")?,
        analytics: AnalyticsFlags {
            google_analytics: row.get("has_google_analytics")?,
            gtag: row.get("has_gtag")?,
            google_tag_manager: row.get("has_google_tag_manager")?,
            facebook_pixel: row.get("has_facebook_pixel")?,
            hotjar: row.get("has_hotjar")?,
            mixpanel: row.get("has_mixpanel")?,
            ga4_id: row.get("ga4_id")?,
            gtm_id: row.get("gtm_id")?,
        },
        security_headers: SecurityHeaders {
            strict_transport_security: row.get("strict_transport_security")?,
            content_security_policy: row.get("content_security_policy")?,
            x_frame_options: row.get("x_frame_options")?,
            x_content_type_options: row.get("x_content_type_options")?,
        },
        is_https: row.get("is_https")?,
        crawled_at: timestamp_column(row, "crawled_at")?,
        error: row.get("error")?,
    })
}

fn insert_link(conn: &Connection, link: &LinkEdge) -> StorageResult<()> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO links ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        LINK_COLUMNS
    ))?;
    stmt.execute(params![
        link.crawl_id,
        link.source_url,
        link.target_url,
        link.anchor_text,
        link.is_internal,
        link.target_domain,
        link.placement.as_str(),
        link.discovered_at.to_rfc3339(),
    ])?;
    Ok(())
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LinkEdge> {
    let placement: String = row.get("placement")?;
    Ok(LinkEdge {
        crawl_id: row.get("crawl_id")?,
        source_url: row.get("source_url")?,
        target_url: row.get("target_url")?,
        anchor_text: row.get("anchor_text")?,
        is_internal: row.get("is_internal")?,
        target_domain: row.get("target_domain")?,
        placement: Placement::from_db_string(&placement).unwrap_or(Placement::Body),
        discovered_at: timestamp_column(row, "discovered_at")?,
    })
}

fn insert_error(conn: &Connection, error: &CrawlError) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO errors (crawl_id, url, category, message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            error.crawl_id,
            error.url,
            error.category.as_str(),
            error.message,
            error.timestamp.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlError> {
    let category: String = row.get("category")?;
    Ok(CrawlError {
        crawl_id: row.get("crawl_id")?,
        url: row.get("url")?,
        category: ErrorCategory::from_db_string(&category).unwrap_or(ErrorCategory::Network),
        message: row.get("message")?,
        timestamp: timestamp_column(row, "timestamp")?,
    })
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlMetadata> {
    let status: String = row.get("status")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    Ok(CrawlMetadata {
        crawl_id: row.get("crawl_id")?,
        start_url: row.get("start_url")?,
        status: CrawlStatus::from_db_string(&status).unwrap_or(CrawlStatus::Failed),
        started_at: timestamp_column(row, "started_at")?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        updated_at: timestamp_column(row, "updated_at")?,
        config_hash: row.get("config_hash")?,
        stats: CrawlStats {
            pages_discovered: row.get("pages_discovered")?,
            pages_crawled: row.get("pages_crawled")?,
            pages_failed: row.get("pages_failed")?,
            pages_skipped: row.get("pages_skipped")?,
            max_depth_reached: row.get("max_depth_reached")?,
            duration_secs: row.get("duration_secs")?,
            pages_per_second: row.get("pages_per_second")?,
        },
    })
}

/// Binds a JSON parameter as the closest SQLite value
fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(hex::encode(bytes)),
    }
}

impl Storage for SqliteStorage {
    // ===== Metadata =====

    fn upsert_metadata(&mut self, metadata: &CrawlMetadata) -> StorageResult<()> {
        let stats = &metadata.stats;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO metadata ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                METADATA_COLUMNS
            ),
            params![
                metadata.crawl_id,
                metadata.start_url,
                metadata.status.to_db_string(),
                metadata.started_at.to_rfc3339(),
                metadata.completed_at.map(|at| at.to_rfc3339()),
                metadata.updated_at.to_rfc3339(),
                metadata.config_hash,
                stats.pages_discovered,
                stats.pages_crawled,
                stats.pages_failed,
                stats.pages_skipped,
                stats.max_depth_reached,
                stats.duration_secs,
                stats.pages_per_second,
            ],
        )?;
        Ok(())
    }

    fn get_metadata(&self, crawl_id: &str) -> StorageResult<Option<CrawlMetadata>> {
        let metadata = self
            .conn
            .query_row(
                &format!("SELECT {} FROM metadata WHERE crawl_id = ?1", METADATA_COLUMNS),
                params![crawl_id],
                metadata_from_row,
            )
            .optional()?;
        Ok(metadata)
    }

    fn get_latest_metadata(&self) -> StorageResult<Option<CrawlMetadata>> {
        let metadata = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM metadata ORDER BY started_at DESC LIMIT 1",
                    METADATA_COLUMNS
                ),
                [],
                metadata_from_row,
            )
            .optional()?;
        Ok(metadata)
    }

    // ===== Pages =====

    fn save_page(&mut self, page: &PageRecord) -> StorageResult<()> {
        insert_page(&self.conn, page)
    }

    fn save_pages(&mut self, pages: &[PageRecord]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for page in pages {
            insert_page(&tx, page)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_page(&self, url: &str) -> StorageResult<Option<PageRecord>> {
        let page = self
            .conn
            .query_row(
                "SELECT * FROM pages WHERE url = ?1",
                params![url],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    fn list_pages(&self) -> StorageResult<Vec<PageRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM pages ORDER BY depth, url")?;
        let pages = stmt
            .query_map([], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    // ===== Links =====

    fn append_links(&mut self, links: &[LinkEdge]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for link in links {
            insert_link(&tx, link)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_links(&self) -> StorageResult<Vec<LinkEdge>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM links ORDER BY source_url, target_url, id",
            LINK_COLUMNS
        ))?;
        let links = stmt
            .query_map([], link_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    // ===== Errors =====

    fn append_error(&mut self, error: &CrawlError) -> StorageResult<()> {
        insert_error(&self.conn, error)
    }

    fn append_errors(&mut self, errors: &[CrawlError]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for error in errors {
            insert_error(&tx, error)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_errors(&self) -> StorageResult<Vec<CrawlError>> {
        let mut stmt = self.conn.prepare(
            "SELECT crawl_id, url, category, message, timestamp FROM errors ORDER BY id",
        )?;
        let errors = stmt
            .query_map([], error_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(errors)
    }

    // ===== Statistics =====

    fn count_pages(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_links(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_errors(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM errors", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_error_summary(&self) -> StorageResult<BTreeMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT category, COUNT(*) FROM errors GROUP BY category")?;

        let mut summary = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (category, count) = row?;
            summary.insert(category, count as u64);
        }

        Ok(summary)
    }

    fn get_placement_breakdown(&self) -> StorageResult<BTreeMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT placement, COUNT(*) FROM links GROUP BY placement")?;

        let mut breakdown = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (placement, count) = row?;
            breakdown.insert(placement, count as u64);
        }

        Ok(breakdown)
    }

    fn get_depth_breakdown(&self) -> StorageResult<BTreeMap<u32, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT depth, COUNT(*) FROM pages GROUP BY depth ORDER BY depth")?;

        let mut breakdown = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (depth, count) = row?;
            breakdown.insert(depth, count as u64);
        }

        Ok(breakdown)
    }

    // ===== Ad-hoc queries =====

    fn query(&self, sql: &str, params: &[serde_json::Value]) -> StorageResult<Vec<QueryRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(StorageError::ReadOnlyViolation(sql.trim().to_string()));
        }

        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let bound: Vec<SqlValue> = params.iter().map(json_to_sql).collect();

        let mut rows = stmt.query(params_from_iter(bound.iter()))?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = QueryRow::new();
            for (index, column) in columns.iter().enumerate() {
                record.insert(column.clone(), sql_to_json(row.get_ref(index)?));
            }
            results.push(record);
        }

        Ok(results)
    }
}
