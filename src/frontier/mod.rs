//! Crawl frontier: canonical per-session URL state
//!
//! The frontier records every discovered URL with the depth it was first seen at,
//! the set of pages linking to it, and whether it has been visited. All keys are
//! normalized URLs. Operations on different keys never coordinate, so a sharded
//! concurrent map is enough for callers on any number of tasks.

use crate::url::{is_internal, normalize_url};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;

/// Discovery record for a single normalized URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Depth at first discovery; never rewritten
    pub depth: u32,

    /// Normalized URLs of pages linking here; only grows
    pub source_pages: BTreeSet<String>,
}

/// Session-scoped URL state shared by the orchestrator and its workers
#[derive(Debug)]
pub struct Frontier {
    base_domain: String,
    entries: DashMap<String, FrontierEntry>,
    visited: DashSet<String>,
}

impl Frontier {
    /// Creates an empty frontier classifying URLs against `base_domain`
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
            entries: DashMap::new(),
            visited: DashSet::new(),
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Canonical form of a URL (see [`normalize_url`])
    pub fn normalize(&self, url: &str) -> String {
        normalize_url(url)
    }

    /// True if the URL's host (without `www.`) equals the base domain
    pub fn is_internal(&self, url: &str) -> bool {
        is_internal(url, &self.base_domain)
    }

    /// Records a discovery of `url` at `depth`, optionally linked from `source_url`
    ///
    /// The depth is only written when the URL is new; later discoveries at any depth
    /// leave it unchanged. The source, if given, is added to the URL's source set
    /// either way.
    ///
    /// Returns true if this call discovered the URL for the first time.
    pub fn add_discovered(&self, url: &str, depth: u32, source_url: Option<&str>) -> bool {
        let key = normalize_url(url);
        let source = source_url.map(normalize_url);

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(source) = source {
                    occupied.get_mut().source_pages.insert(source);
                }
                false
            }
            Entry::Vacant(vacant) => {
                let mut source_pages = BTreeSet::new();
                if let Some(source) = source {
                    source_pages.insert(source);
                }
                vacant.insert(FrontierEntry {
                    depth,
                    source_pages,
                });
                true
            }
        }
    }

    /// Marks a discovered URL as visited
    ///
    /// Returns false (and records nothing) for URLs that were never discovered,
    /// so the visited set stays a subset of the discovered set.
    pub fn mark_visited(&self, url: &str) -> bool {
        let key = normalize_url(url);
        if !self.entries.contains_key(&key) {
            return false;
        }
        self.visited.insert(key);
        true
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(&normalize_url(url))
    }

    pub fn is_discovered(&self, url: &str) -> bool {
        self.entries.contains_key(&normalize_url(url))
    }

    pub fn get_depth(&self, url: &str) -> Option<u32> {
        self.entries
            .get(&normalize_url(url))
            .map(|entry| entry.depth)
    }

    /// Pages known to link to `url`, in sorted order
    pub fn get_source_pages(&self, url: &str) -> Vec<String> {
        self.entries
            .get(&normalize_url(url))
            .map(|entry| entry.source_pages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Discovered minus visited, sorted
    ///
    /// A non-empty result after a session ends means the crawl was truncated by the
    /// page cap or by failures upstream of the fetch.
    pub fn get_unvisited_urls(&self) -> Vec<String> {
        let mut unvisited: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !self.visited.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        unvisited.sort();
        unvisited
    }

    pub fn discovered_count(&self) -> usize {
        self.entries.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_discovered_normalizes() {
        let frontier = Frontier::new("example.com");
        assert!(frontier.add_discovered("https://www.example.com/a/#x", 1, None));

        assert!(frontier.is_discovered("https://example.com/a"));
        assert_eq!(frontier.get_depth("https://example.com/a/"), Some(1));
    }

    #[test]
    fn test_first_discoverer_wins() {
        let frontier = Frontier::new("example.com");
        assert!(frontier.add_discovered("https://example.com/deep", 3, None));
        assert!(!frontier.add_discovered("https://example.com/deep", 1, None));
        assert!(!frontier.add_discovered("https://example.com/deep", 5, None));

        assert_eq!(frontier.get_depth("https://example.com/deep"), Some(3));
    }

    #[test]
    fn test_source_pages_grow() {
        let frontier = Frontier::new("example.com");
        let target = "https://example.com/target";

        frontier.add_discovered(target, 1, Some("https://example.com/a"));
        frontier.add_discovered(target, 1, Some("https://example.com/b"));

        assert_eq!(
            frontier.get_source_pages(target),
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string()
            ]
        );
    }

    #[test]
    fn test_source_pages_idempotent() {
        let frontier = Frontier::new("example.com");
        let target = "https://example.com/target";

        frontier.add_discovered(target, 1, Some("https://example.com/a"));
        frontier.add_discovered(target, 2, Some("https://www.example.com/a/"));

        assert_eq!(frontier.get_source_pages(target).len(), 1);
    }

    #[test]
    fn test_visited_subset_of_discovered() {
        let frontier = Frontier::new("example.com");
        assert!(!frontier.mark_visited("https://example.com/never-seen"));
        assert!(!frontier.is_visited("https://example.com/never-seen"));

        frontier.add_discovered("https://example.com/", 0, None);
        assert!(frontier.mark_visited("https://example.com"));
        assert!(frontier.is_visited("https://example.com/"));
        assert_eq!(frontier.visited_count(), 1);
    }

    #[test]
    fn test_stored_key_round_trips_for_repeated_www() {
        let frontier = Frontier::new("example.com");
        frontier.add_discovered("https://www.www.example.com/a", 1, None);

        let key = normalize_url("https://www.www.example.com/a");
        assert_eq!(key, "https://example.com/a");
        assert!(frontier.mark_visited(&key));
        assert!(frontier.get_unvisited_urls().is_empty());
    }

    #[test]
    fn test_unvisited_urls() {
        let frontier = Frontier::new("example.com");
        frontier.add_discovered("https://example.com/", 0, None);
        frontier.add_discovered("https://example.com/b", 1, None);
        frontier.add_discovered("https://example.com/a", 1, None);
        frontier.mark_visited("https://example.com/");

        assert_eq!(
            frontier.get_unvisited_urls(),
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string()
            ]
        );
    }

    #[test]
    fn test_unknown_url_reads() {
        let frontier = Frontier::new("example.com");
        assert_eq!(frontier.get_depth("https://example.com/x"), None);
        assert!(frontier.get_source_pages("https://example.com/x").is_empty());
        assert!(!frontier.is_discovered("https://example.com/x"));
    }

    #[test]
    fn test_is_internal_uses_base_domain() {
        let frontier = Frontier::new("www.example.com");
        assert!(frontier.is_internal("https://example.com/a"));
        assert!(!frontier.is_internal("https://other.org/"));
    }

    #[test]
    fn test_concurrent_discovery_single_winner() {
        let frontier = Arc::new(Frontier::new("example.com"));
        let target = "https://example.com/contended";

        let handles: Vec<_> = (0..16u32)
            .map(|depth| {
                let frontier = Arc::clone(&frontier);
                thread::spawn(move || {
                    let source = format!("https://example.com/source-{}", depth);
                    let won = frontier.add_discovered(target, depth, Some(&source));
                    (depth, won)
                })
            })
            .collect();

        let results: Vec<(u32, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<u32> = results
            .iter()
            .filter(|(_, won)| *won)
            .map(|(depth, _)| *depth)
            .collect();

        assert_eq!(winners.len(), 1);
        assert_eq!(frontier.get_depth(target), Some(winners[0]));
        assert_eq!(frontier.get_source_pages(target).len(), 16);
    }
}
