//! Database schema definitions and migrations
//!
//! Four tables: `metadata` (one row per crawl), `pages` (one row per normalized URL),
//! `links` and `errors` (append-only). Databases written by older versions are brought
//! forward by adding whatever columns of the current schema they lack; migrations never
//! drop or rewrite anything.

use crate::storage::traits::{StorageError, StorageResult};
use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    crawl_id TEXT PRIMARY KEY,
    start_url TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    config_hash TEXT NOT NULL DEFAULT '',
    pages_discovered INTEGER NOT NULL DEFAULT 0,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    pages_skipped INTEGER NOT NULL DEFAULT 0,
    max_depth_reached INTEGER NOT NULL DEFAULT 0,
    duration_secs REAL NOT NULL DEFAULT 0,
    pages_per_second REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pages (
    url TEXT PRIMARY KEY,
    final_url TEXT,
    status_code INTEGER,
    content_type TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    depth INTEGER NOT NULL DEFAULT 0,
    is_internal INTEGER NOT NULL DEFAULT 1,
    linked_from TEXT,
    title TEXT,
    title_length INTEGER NOT NULL DEFAULT 0,
    meta_description TEXT,
    meta_description_length INTEGER NOT NULL DEFAULT 0,
    h1 TEXT,
    h1_count INTEGER NOT NULL DEFAULT 0,
    h2 TEXT,
    h3 TEXT,
    word_count INTEGER NOT NULL DEFAULT 0,
    canonical_url TEXT,
    meta_robots TEXT,
    viewport TEXT,
    author TEXT,
    keywords TEXT,
    generator TEXT,
    theme_color TEXT,
    lang TEXT,
    charset TEXT,
    meta_tags TEXT,
    og_tags TEXT,
    twitter_tags TEXT,
    structured_data TEXT,
    microdata TEXT,
    heading_counts TEXT,
    heading_hierarchy TEXT,
    heading_sequential_errors TEXT,
    images TEXT,
    image_count INTEGER NOT NULL DEFAULT 0,
    images_without_alt INTEGER NOT NULL DEFAULT 0,
    internal_links INTEGER NOT NULL DEFAULT 0,
    external_links INTEGER NOT NULL DEFAULT 0,
    unsafe_target_blank INTEGER NOT NULL DEFAULT 0,
    protocol_relative_count INTEGER NOT NULL DEFAULT 0,
    hreflang TEXT,
    has_google_analytics INTEGER NOT NULL DEFAULT 0,
    has_gtag INTEGER NOT NULL DEFAULT 0,
    has_google_tag_manager INTEGER NOT NULL DEFAULT 0,
    has_facebook_pixel INTEGER NOT NULL DEFAULT 0,
    has_hotjar INTEGER NOT NULL DEFAULT 0,
    has_mixpanel INTEGER NOT NULL DEFAULT 0,
    ga4_id TEXT,
    gtm_id TEXT,
    strict_transport_security TEXT,
    content_security_policy TEXT,
    x_frame_options TEXT,
    x_content_type_options TEXT,
    is_https INTEGER NOT NULL DEFAULT 0,
    crawled_at TEXT NOT NULL,
    error TEXT
);

CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id TEXT NOT NULL,
    source_url TEXT NOT NULL,
    target_url TEXT NOT NULL,
    anchor_text TEXT NOT NULL,
    is_internal INTEGER NOT NULL,
    target_domain TEXT NOT NULL,
    placement TEXT NOT NULL DEFAULT 'body',
    discovered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id TEXT NOT NULL,
    url TEXT NOT NULL,
    category TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
"#;

/// Indexes are created after migration so they may reference added columns
pub const INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_pages_depth ON pages(depth, url);
CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status_code);
CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_url, target_url);
CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_url);
CREATE INDEX IF NOT EXISTS idx_errors_category ON errors(category);
"#;

/// Tables defined by [`SCHEMA_SQL`], in creation order
pub const TABLES: &[&str] = &["metadata", "pages", "links", "errors"];

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    migrate(conn)?;
    conn.execute_batch(INDEX_SQL)?;
    Ok(())
}

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnInfo {
    name: String,
    declared_type: String,
    not_null: bool,
    default: Option<String>,
}

impl ColumnInfo {
    /// Declaration usable with `ALTER TABLE ... ADD COLUMN`
    ///
    /// SQLite refuses to add a NOT NULL column without a default, so one is
    /// supplied from the column type when the schema has none.
    fn add_declaration(&self) -> String {
        let mut declaration = self.declared_type.clone();
        if self.not_null {
            let default = self.default.clone().unwrap_or_else(|| {
                let upper = self.declared_type.to_uppercase();
                if upper.contains("INT") || upper.contains("REAL") {
                    "0".to_string()
                } else {
                    "''".to_string()
                }
            });
            declaration.push_str(&format!(" NOT NULL DEFAULT {}", default));
        } else if let Some(default) = &self.default {
            declaration.push_str(&format!(" DEFAULT {}", default));
        }
        declaration
    }
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(1)?,
            declared_type: row.get(2)?,
            not_null: row.get::<_, i64>(3)? != 0,
            default: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// Adds every column of the current schema that the database lacks
///
/// The current layout is read from a scratch in-memory database built from
/// [`SCHEMA_SQL`]. Columns are only ever added; a missing table or a failed
/// `ALTER TABLE` aborts the open.
pub fn migrate(conn: &Connection) -> StorageResult<()> {
    let reference = Connection::open_in_memory()?;
    reference.execute_batch(SCHEMA_SQL)?;

    for table in TABLES {
        let existing: Vec<String> = table_columns(conn, table)?
            .into_iter()
            .map(|column| column.name)
            .collect();
        if existing.is_empty() {
            return Err(StorageError::Migration {
                table: table.to_string(),
                column: String::new(),
                message: "no such table".to_string(),
            });
        }

        for column in table_columns(&reference, table)? {
            if existing.iter().any(|name| name.eq_ignore_ascii_case(&column.name)) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table,
                column.name,
                column.add_declaration()
            );
            match conn.execute(&sql, []) {
                Ok(_) => tracing::info!("Added column {}.{}", table, column.name),
                Err(e) if e.to_string().contains("duplicate column name") => {}
                Err(e) => {
                    return Err(StorageError::Migration {
                        table: table.to_string(),
                        column: column.name,
                        message: e.to_string(),
                    })
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_names(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_schema_initializes() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["metadata", "pages", "links", "errors"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_migration_adds_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE pages (url TEXT PRIMARY KEY, title TEXT, depth INTEGER NOT NULL,
                 status_code INTEGER, crawled_at TEXT NOT NULL);
             CREATE TABLE links (id INTEGER PRIMARY KEY, crawl_id TEXT NOT NULL,
                 source_url TEXT NOT NULL, target_url TEXT NOT NULL,
                 anchor_text TEXT NOT NULL, is_internal INTEGER NOT NULL,
                 discovered_at TEXT NOT NULL);
             INSERT INTO pages (url, title, depth, crawled_at)
                 VALUES ('https://example.com', 'Old', 0, '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        initialize_schema(&conn).unwrap();

        let page_columns = column_names(&conn, "pages");
        assert!(page_columns.contains(&"hreflang".to_string()));
        assert!(page_columns.contains(&"is_https".to_string()));
        assert!(column_names(&conn, "links").contains(&"placement".to_string()));

        let title: String = conn
            .query_row("SELECT title FROM pages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(title, "Old");

        // Every current column is present afterwards
        let reference = Connection::open_in_memory().unwrap();
        reference.execute_batch(SCHEMA_SQL).unwrap();
        for table in TABLES {
            let migrated = column_names(&conn, table);
            for column in column_names(&reference, table) {
                assert!(migrated.contains(&column), "{}.{} missing", table, column);
            }
        }
    }

    #[test]
    fn test_not_null_column_gets_type_default() {
        let column = ColumnInfo {
            name: "crawled_at".to_string(),
            declared_type: "TEXT".to_string(),
            not_null: true,
            default: None,
        };
        assert_eq!(column.add_declaration(), "TEXT NOT NULL DEFAULT ''");

        let column = ColumnInfo {
            name: "depth".to_string(),
            declared_type: "INTEGER".to_string(),
            not_null: true,
            default: Some("0".to_string()),
        };
        assert_eq!(column.add_declaration(), "INTEGER NOT NULL DEFAULT 0");
    }

    #[test]
    fn test_migration_reports_real_failures() {
        let conn = Connection::open_in_memory().unwrap();
        // No tables at all
        let result = migrate(&conn);
        assert!(matches!(result, Err(StorageError::Migration { .. })));
    }
}
