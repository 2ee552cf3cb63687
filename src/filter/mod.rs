//! Link admission policy
//!
//! Decides whether a resolved link may enter the frontier. Checks run cheapest first:
//! scheme, file extension, include/exclude patterns, then the internal-only policy.

use crate::config::FilterConfig;
use crate::url::is_internal_url;
use crate::ConfigError;
use regex::Regex;
use std::fmt;
use url::Url;

/// Outcome of a filter check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject(RejectReason),
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Why a link was not admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Scheme(String),
    DeniedExtension(String),
    ExtensionNotAllowed(String),
    NoIncludeMatch,
    Excluded(String),
    External,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheme(scheme) => write!(f, "unsupported scheme '{}'", scheme),
            Self::DeniedExtension(ext) => write!(f, "denied extension '.{}'", ext),
            Self::ExtensionNotAllowed(ext) => write!(f, "extension '.{}' not in allow list", ext),
            Self::NoIncludeMatch => write!(f, "matches no include pattern"),
            Self::Excluded(pattern) => write!(f, "matches exclude pattern '{}'", pattern),
            Self::External => write!(f, "external link"),
        }
    }
}

/// Compiled link filter for one crawl session
#[derive(Debug, Clone)]
pub struct LinkFilter {
    allowed_extensions: Vec<String>,
    denied_extensions: Vec<String>,
    include_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
    base_domain: String,
    crawl_external: bool,
}

impl LinkFilter {
    /// Compiles the configured patterns
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPattern` for the first pattern that fails to compile.
    pub fn new(
        config: &FilterConfig,
        base_domain: impl Into<String>,
        crawl_external: bool,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            allowed_extensions: lowercase_all(&config.allowed_extensions),
            denied_extensions: lowercase_all(&config.denied_extensions),
            include_patterns: compile_patterns(&config.include_patterns)?,
            exclude_patterns: compile_patterns(&config.exclude_patterns)?,
            base_domain: base_domain.into(),
            crawl_external,
        })
    }

    /// Checks a resolved link against every rule
    pub fn check(&self, url: &Url) -> FilterDecision {
        match self.rejection(url) {
            Some(reason) => FilterDecision::Reject(reason),
            None => FilterDecision::Accept,
        }
    }

    fn rejection(&self, url: &Url) -> Option<RejectReason> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Some(RejectReason::Scheme(scheme.to_string()));
        }

        if let Some(ext) = path_extension(url) {
            if self.denied_extensions.iter().any(|denied| *denied == ext) {
                return Some(RejectReason::DeniedExtension(ext));
            }
            if !self.allowed_extensions.is_empty()
                && !self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            {
                return Some(RejectReason::ExtensionNotAllowed(ext));
            }
        }

        let target = url.as_str();
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|re| re.is_match(target))
        {
            return Some(RejectReason::NoIncludeMatch);
        }

        if let Some(re) = self.exclude_patterns.iter().find(|re| re.is_match(target)) {
            return Some(RejectReason::Excluded(re.as_str().to_string()));
        }

        if !self.crawl_external && !is_internal_url(url, &self.base_domain) {
            return Some(RejectReason::External);
        }

        None
    }
}

/// Lowercased extension of the last path segment, if it has one
fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}
