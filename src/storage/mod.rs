//! Storage module for persisting crawl data
//!
//! This module handles all database operations for a crawl session:
//! - SQLite database initialization and additive schema migration
//! - Page records, link edges and crawl errors
//! - Crawl metadata snapshots
//! - Read-only ad-hoc queries and CSV export of the pages table

mod export;
mod schema;
mod sqlite;
mod traits;

pub use export::{export_pages_csv, PAGES_CSV_COLUMNS};
pub use sqlite::SqliteStorage;
pub use traits::{QueryRow, Storage, StorageError, StorageResult};

use crate::state::CrawlStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Counters reported for a crawl session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_discovered: u64,
    pub pages_crawled: u64,
    pub pages_failed: u64,
    pub pages_skipped: u64,
    pub max_depth_reached: u32,
    pub duration_secs: f64,
    pub pages_per_second: f64,
}

/// The one metadata row of a crawl session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlMetadata {
    pub crawl_id: String,
    pub start_url: String,
    pub status: CrawlStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub config_hash: String,
    pub stats: CrawlStats,
}

impl CrawlMetadata {
    /// Metadata for a session that has not started yet
    pub fn new(
        crawl_id: impl Into<String>,
        start_url: impl Into<String>,
        config_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            crawl_id: crawl_id.into(),
            start_url: start_url.into(),
            status: CrawlStatus::Queued,
            started_at: now,
            completed_at: None,
            updated_at: now,
            config_hash: config_hash.into(),
            stats: CrawlStats::default(),
        }
    }
}

/// Classification of a crawl error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Dns,
    Connection,
    Ssl,
    Auth,
    NotFound,
    RateLimit,
    ServerError,
    Network,
    /// A page record failed its own shape check
    Extraction,
    /// The session itself failed
    Session,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connection => "connection",
            Self::Ssl => "ssl",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::Extraction => "extraction",
            Self::Session => "session",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "dns" => Some(Self::Dns),
            "connection" => Some(Self::Connection),
            "ssl" => Some(Self::Ssl),
            "auth" => Some(Self::Auth),
            "not_found" => Some(Self::NotFound),
            "rate_limit" => Some(Self::RateLimit),
            "server_error" => Some(Self::ServerError),
            "network" => Some(Self::Network),
            "extraction" => Some(Self::Extraction),
            "session" => Some(Self::Session),
            _ => None,
        }
    }

    /// Failures that suggest the server wants fewer concurrent requests
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only error row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlError {
    pub crawl_id: String,
    pub url: String,
    pub category: ErrorCategory,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CrawlError {
    pub fn new(
        crawl_id: impl Into<String>,
        url: impl Into<String>,
        category: ErrorCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            crawl_id: crawl_id.into(),
            url: url.into(),
            category,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_roundtrip() {
        for category in [
            ErrorCategory::Timeout,
            ErrorCategory::Dns,
            ErrorCategory::Connection,
            ErrorCategory::Ssl,
            ErrorCategory::Auth,
            ErrorCategory::NotFound,
            ErrorCategory::RateLimit,
            ErrorCategory::ServerError,
            ErrorCategory::Network,
            ErrorCategory::Extraction,
            ErrorCategory::Session,
        ] {
            assert_eq!(
                ErrorCategory::from_db_string(category.as_str()),
                Some(category)
            );
        }
        assert_eq!(ErrorCategory::from_db_string("invalid"), None);
    }

    #[test]
    fn test_throttling_categories() {
        assert!(ErrorCategory::RateLimit.is_throttling());
        assert!(ErrorCategory::Timeout.is_throttling());
        assert!(!ErrorCategory::NotFound.is_throttling());
    }

    #[test]
    fn test_new_metadata_is_queued() {
        let metadata = CrawlMetadata::new("c1", "https://example.com", "abc");
        assert_eq!(metadata.status, CrawlStatus::Queued);
        assert_eq!(metadata.completed_at, None);
        assert_eq!(metadata.stats, CrawlStats::default());
    }
}
