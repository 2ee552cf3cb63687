//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::extract::{LinkEdge, PageRecord};
use crate::storage::{CrawlError, CrawlMetadata};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration of {table}.{column} failed: {message}")]
    Migration {
        table: String,
        column: String,
        message: String,
    },

    #[error("Statement is not read-only: {0}")]
    ReadOnlyViolation(String),

    #[error("Crawl not found: {0}")]
    CrawlNotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A row returned by [`Storage::query`], keyed by column name
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

/// Trait for storage backend implementations
///
/// Any write touching more than one row runs in a single transaction: either the
/// whole batch becomes visible or none of it does.
pub trait Storage {
    // ===== Metadata =====

    /// Inserts or replaces the metadata row for `metadata.crawl_id`
    fn upsert_metadata(&mut self, metadata: &CrawlMetadata) -> StorageResult<()>;

    fn get_metadata(&self, crawl_id: &str) -> StorageResult<Option<CrawlMetadata>>;

    /// The most recently started crawl in this database
    fn get_latest_metadata(&self) -> StorageResult<Option<CrawlMetadata>>;

    // ===== Pages =====

    /// Inserts a page, replacing any existing row with the same URL
    fn save_page(&mut self, page: &PageRecord) -> StorageResult<()>;

    /// Saves several pages atomically
    fn save_pages(&mut self, pages: &[PageRecord]) -> StorageResult<()>;

    /// Point lookup by normalized URL
    fn get_page(&self, url: &str) -> StorageResult<Option<PageRecord>>;

    /// All pages ordered by (depth, url)
    fn list_pages(&self) -> StorageResult<Vec<PageRecord>>;

    // ===== Links =====

    /// Appends edges atomically; rows are never merged or updated
    fn append_links(&mut self, links: &[LinkEdge]) -> StorageResult<()>;

    /// All edges ordered by (source, target), insertion order within a pair
    fn list_links(&self) -> StorageResult<Vec<LinkEdge>>;

    // ===== Errors =====

    fn append_error(&mut self, error: &CrawlError) -> StorageResult<()>;

    /// Appends errors atomically
    fn append_errors(&mut self, errors: &[CrawlError]) -> StorageResult<()>;

    fn list_errors(&self) -> StorageResult<Vec<CrawlError>>;

    // ===== Statistics =====

    fn count_pages(&self) -> StorageResult<u64>;

    fn count_links(&self) -> StorageResult<u64>;

    fn count_errors(&self) -> StorageResult<u64>;

    /// Error category -> count
    fn get_error_summary(&self) -> StorageResult<BTreeMap<String, u64>>;

    /// Link placement -> count
    fn get_placement_breakdown(&self) -> StorageResult<BTreeMap<String, u64>>;

    /// Depth -> number of pages at that depth
    fn get_depth_breakdown(&self) -> StorageResult<BTreeMap<u32, u64>>;

    // ===== Ad-hoc queries =====

    /// Runs a read-only statement with positional parameters
    ///
    /// Statements that could modify the database are refused with
    /// [`StorageError::ReadOnlyViolation`] before they execute.
    fn query(&self, sql: &str, params: &[serde_json::Value]) -> StorageResult<Vec<QueryRow>>;
}
