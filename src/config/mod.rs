//! Configuration module for Sumi-SEO
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_seo::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawl.toml")).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, FilterConfig, OutputConfig, UserAgentConfig,
    DEFAULT_DENIED_EXTENSIONS,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, hash_config_content, load_config, load_config_with_hash, parse_config,
    write_config,
};
pub use validation::validate;
