use url::Url;

/// Strips every leading `www.` label from a host
pub fn strip_www(host: &str) -> &str {
    let mut host = host;
    while let Some(rest) = host.strip_prefix("www.") {
        host = rest;
    }
    host
}

/// Extracts the comparison domain from a URL: lowercase host without `www.`
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_seo::url::extract_domain;
///
/// let url = Url::parse("https://www.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str()
        .map(|host| strip_www(&host.to_lowercase()).to_string())
}

/// Compares a URL's domain against the configured base domain
///
/// Fail-closed: anything that cannot be parsed or has no host is external.
///
/// ```
/// use sumi_seo::url::is_internal;
///
/// assert!(is_internal("https://www.example.com/a", "example.com"));
/// assert!(!is_internal("https://blog.example.com/", "example.com"));
/// assert!(!is_internal("::garbage::", "example.com"));
/// ```
pub fn is_internal(url: &str, base_domain: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => is_internal_url(&parsed, base_domain),
        Err(_) => false,
    }
}

/// Parsed-URL form of [`is_internal`]
pub fn is_internal_url(url: &Url, base_domain: &str) -> bool {
    match extract_domain(url) {
        Some(domain) => domain == strip_www(&base_domain.to_lowercase()),
        None => false,
    }
}
