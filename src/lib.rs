//! Sumi-SEO: a breadth-first SEO crawler
//!
//! This crate crawls a website breadth-first, extracts structured SEO signals from each
//! page, records the link graph, and persists everything to SQLite for later querying.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod filter;
pub mod frontier;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-SEO operations
#[derive(Debug, Error)]
pub enum SeoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid crawl status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::CrawlStatus,
        to: state::CrawlStatus,
    },

    #[error("Fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Crawl session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid filter pattern {pattern}: {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Sumi-SEO operations
pub type Result<T> = std::result::Result<T, SeoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::Coordinator;
pub use frontier::Frontier;
pub use state::{CrawlStatus, FetchState};
pub use storage::{CrawlMetadata, SqliteStorage, Storage};
pub use crate::url::{is_internal, normalize_url};
