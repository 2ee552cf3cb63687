use crate::url::domain::strip_www;
use url::Url;

/// Normalizes a URL into the canonical key used by the frontier and the pages table
///
/// # Normalization Steps
///
/// 1. Parse the URL; unparsable input is returned unchanged
/// 2. Remove the fragment (everything after #)
/// 3. Remove a leading `www.` from the host
/// 4. Remove trailing slashes, except for the bare origin path `/`
/// 5. Keep the query string as-is
///
/// Normalization is best-effort, not validation: it never fails.
///
/// # Examples
///
/// ```
/// use sumi_seo::url::normalize_url;
///
/// assert_eq!(normalize_url("https://www.example.com/page/#top"), "https://example.com/page");
/// assert_eq!(normalize_url("https://example.com"), "https://example.com/");
/// assert_eq!(normalize_url("not a url"), "not a url");
/// ```
pub fn normalize_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(url) => normalize_parsed(url),
        Err(_) => url_str.to_string(),
    }
}

/// Normalizes an already-parsed URL
pub fn normalize_parsed(mut url: Url) -> String {
    url.set_fragment(None);

    if let Some(host) = url.host_str() {
        let stripped = strip_www(host);
        if stripped.len() != host.len() {
            let stripped = stripped.to_string();
            // A host that cannot be re-set is kept as parsed
            let _ = url.set_host(Some(&stripped));
        }
    }

    if !url.cannot_be_a_base() {
        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/');
            let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
            let trimmed = trimmed.to_string();
            url.set_path(&trimmed);
        }
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_fragment() {
        assert_eq!(
            normalize_url("https://example.com/page#section"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_remove_www() {
        assert_eq!(
            normalize_url("https://www.example.com/about"),
            "https://example.com/about"
        );
    }

    #[test]
    fn test_remove_trailing_slash() {
        assert_eq!(
            normalize_url("https://example.com/page/"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_keep_root_slash() {
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
    }

    #[test]
    fn test_keep_query_string() {
        assert_eq!(
            normalize_url("https://example.com/search/?q=rust&page=2#results"),
            "https://example.com/search?q=rust&page=2"
        );
    }

    #[test]
    fn test_keep_scheme_and_port() {
        assert_eq!(
            normalize_url("http://127.0.0.1:8080/docs/"),
            "http://127.0.0.1:8080/docs"
        );
    }

    #[test]
    fn test_unparsable_input_returned_unchanged() {
        assert_eq!(normalize_url("not a url"), "not a url");
        assert_eq!(normalize_url("/relative/path/"), "/relative/path/");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn test_cannot_be_a_base_left_alone() {
        assert_eq!(
            normalize_url("mailto:someone@example.com"),
            "mailto:someone@example.com"
        );
    }

    #[test]
    fn test_repeated_trailing_slashes() {
        assert_eq!(
            normalize_url("https://example.com/a//"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_normalization_is_a_fixed_point() {
        let inputs = [
            "https://www.example.com/page/#x",
            "https://example.com",
            "https://example.com/a//",
            "http://www.example.com:8080/shop/?item=3",
            "https://sub.example.com/path/to/page/",
            "not a url",
            "https://example.com/?",
            "https://www.www.example.com/a",
        ];

        for input in inputs {
            let once = normalize_url(input);
            let twice = normalize_url(&once);
            assert_eq!(once, twice, "normalize is not idempotent for {}", input);
        }
    }
}
