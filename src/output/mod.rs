//! Output module for reading back a finished crawl directory
//!
//! This module handles:
//! - Opening the database of an existing crawl directory
//! - Loading and printing crawl statistics
//! - Re-materializing the flat `pages.csv` export

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, CrawlStatistics};

use crate::crawler::{DATABASE_FILE, EXPORT_FILE};
use crate::storage::{export_pages_csv, open_storage, SqliteStorage, StorageError};
use crate::SeoError;
use std::path::{Path, PathBuf};

/// Opens the database inside an existing crawl directory
///
/// # Errors
///
/// Returns `StorageError::CrawlNotFound` when the directory holds no database;
/// opening never creates one.
pub fn open_crawl(crawl_dir: &Path) -> Result<SqliteStorage, SeoError> {
    let db_path = crawl_dir.join(DATABASE_FILE);
    if !db_path.is_file() {
        return Err(StorageError::CrawlNotFound(crawl_dir.display().to_string()).into());
    }
    Ok(open_storage(&db_path)?)
}

/// Loads statistics for the crawl stored in `crawl_dir`
pub fn load_crawl_statistics(crawl_dir: &Path) -> Result<CrawlStatistics, SeoError> {
    let storage = open_crawl(crawl_dir)?;
    Ok(load_statistics(&storage)?)
}

/// Writes `pages.csv` into `crawl_dir`, returning its path and row count
pub fn export_crawl(crawl_dir: &Path) -> Result<(PathBuf, usize), SeoError> {
    let storage = open_crawl(crawl_dir)?;
    let path = crawl_dir.join(EXPORT_FILE);
    let rows = export_pages_csv(&storage, &path)?;
    Ok((path, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_crawl_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = open_crawl(&dir.path().join("nope"));
        assert!(matches!(
            result,
            Err(SeoError::Storage(StorageError::CrawlNotFound(_)))
        ));
    }

    #[test]
    fn test_export_empty_crawl() {
        let dir = tempfile::tempdir().unwrap();
        drop(open_storage(&dir.path().join(DATABASE_FILE)).unwrap());

        let (path, rows) = export_crawl(dir.path()).unwrap();
        assert_eq!(rows, 0);
        assert!(path.exists());

        let stats = load_crawl_statistics(dir.path()).unwrap();
        assert_eq!(stats.total_pages, 0);
        assert!(stats.metadata.is_none());
    }
}
