use serde::{Deserialize, Serialize};

/// Extensions skipped unless the config overrides the deny list
pub const DEFAULT_DENIED_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "gz", "tar", "rar", "7z", "exe", "dmg", "iso", "jpg", "jpeg", "png", "gif",
    "webp", "svg", "ico", "bmp", "tiff", "mp3", "mp4", "avi", "mov", "wmv", "webm", "wav", "ogg",
    "woff", "woff2", "ttf", "eot", "css", "js", "json", "xml", "doc", "docx", "xls", "xlsx",
    "ppt", "pptx",
];

/// Main configuration structure for a crawl session
///
/// The effective configuration (with the crawl id filled in) is written back into the
/// crawl directory as `config.toml`, so every field round-trips through serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// URL the crawl starts from (depth 0)
    pub start_url: String,

    /// Explicit crawl identifier; generated from host and start time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_id: Option<String>,

    /// Maximum link depth from the start URL
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of pages fetched in the session
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Concurrent fetches the worker pool starts with
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: u32,

    /// Upper bound the worker pool may grow to
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds, doubled on every retry
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Follow links that leave the start URL's domain
    #[serde(default)]
    pub crawl_external: bool,

    /// Skip links disallowed by the start origin's robots.txt
    #[serde(default)]
    pub respect_robots_txt: bool,
}

/// User agent identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the header value: `CrawlerName/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Link admission filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterConfig {
    /// When non-empty, only these extensions (plus extension-less paths) are admitted
    #[serde(default)]
    pub allowed_extensions: Vec<String>,

    /// Extensions that are never admitted
    #[serde(default = "default_denied_extensions")]
    pub denied_extensions: Vec<String>,

    /// Regexes; when non-empty a URL must match at least one
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Regexes; any match rejects the URL
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            denied_extensions: default_denied_extensions(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory under which one sub-directory per crawl is created
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// Write `pages.csv` next to the database when the crawl finishes
    #[serde(default = "default_export_csv")]
    pub export_csv: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            export_csv: default_export_csv(),
        }
    }
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> u32 {
    500
}

fn default_min_concurrency() -> u32 {
    2
}

fn default_max_concurrency() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_denied_extensions() -> Vec<String> {
    DEFAULT_DENIED_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_output_directory() -> String {
    "./crawls".to_string()
}

fn default_export_csv() -> bool {
    true
}
