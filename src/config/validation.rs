use crate::config::types::{Config, CrawlerConfig, FilterConfig, OutputConfig, UserAgentConfig};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_filter_config(&config.filters)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let start = Url::parse(&config.start_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid start_url '{}': {}", config.start_url, e))
    })?;

    if start.scheme() != "http" && start.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "start_url must use http or https, got {}",
            start.scheme()
        )));
    }

    if start.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "start_url '{}' has no host",
            config.start_url
        )));
    }

    if let Some(crawl_id) = &config.crawl_id {
        validate_crawl_id(crawl_id)?;
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1".to_string(),
        ));
    }

    if config.min_concurrency < 1 || config.max_concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}..{}",
            config.min_concurrency, config.max_concurrency
        )));
    }

    if config.min_concurrency > config.max_concurrency {
        return Err(ConfigError::Validation(format!(
            "min_concurrency ({}) cannot exceed max_concurrency ({})",
            config.min_concurrency, config.max_concurrency
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    Ok(())
}

/// Crawl ids become directory names, so only path-safe characters are allowed
fn validate_crawl_id(crawl_id: &str) -> Result<(), ConfigError> {
    if crawl_id.is_empty() {
        return Err(ConfigError::Validation(
            "crawl_id cannot be empty".to_string(),
        ));
    }

    if !crawl_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || crawl_id.starts_with('.')
    {
        return Err(ConfigError::Validation(format!(
            "crawl_id '{}' may only contain letters, digits, '-', '_' and '.'",
            crawl_id
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must be alphanumeric with hyphens only, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates filter configuration: every pattern must compile
fn validate_filter_config(config: &FilterConfig) -> Result<(), ConfigError> {
    for pattern in config
        .include_patterns
        .iter()
        .chain(config.exclude_patterns.iter())
    {
        Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
    }

    for ext in config
        .allowed_extensions
        .iter()
        .chain(config.denied_extensions.iter())
    {
        if ext.is_empty() || ext.contains('/') {
            return Err(ConfigError::Validation(format!(
                "Invalid file extension '{}'",
                ext
            )));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Must contain a single @ with text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
