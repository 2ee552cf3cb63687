//! Statistics generation from a crawl database
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::storage::{CrawlMetadata, Storage, StorageResult};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    /// Most recent session recorded in the database
    pub metadata: Option<CrawlMetadata>,

    /// Rows in the pages table, failed fetches included
    pub total_pages: u64,

    /// Pages stored without an error
    pub successful_pages: u64,

    pub total_links: u64,

    pub total_errors: u64,

    /// Depth -> page count
    pub pages_by_depth: BTreeMap<u32, u64>,

    /// Placement -> link count
    pub link_placements: BTreeMap<String, u64>,

    /// Error category -> count
    pub error_summary: BTreeMap<String, u64>,
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<CrawlStatistics> {
    let successful_pages = storage
        .query("SELECT COUNT(*) AS n FROM pages WHERE error IS NULL", &[])?
        .first()
        .and_then(|row| row.get("n"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);

    Ok(CrawlStatistics {
        metadata: storage.get_latest_metadata()?,
        total_pages: storage.count_pages()?,
        successful_pages,
        total_links: storage.count_links()?,
        total_errors: storage.count_errors()?,
        pages_by_depth: storage.get_depth_breakdown()?,
        link_placements: storage.get_placement_breakdown()?,
        error_summary: storage.get_error_summary()?,
    })
}

fn sorted_by_count(map: &BTreeMap<String, u64>) -> Vec<(&String, &u64)> {
    let mut counts: Vec<_> = map.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    counts
}

/// Renders statistics as the plain-text block the CLI prints
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    // Writing to a String cannot fail
    let mut out = String::new();
    let _ = writeln!(out, "=== Crawl Statistics ===\n");

    if let Some(metadata) = &stats.metadata {
        let _ = writeln!(out, "Crawl: {} ({})", metadata.crawl_id, metadata.status);
        let _ = writeln!(out, "  Start URL: {}", metadata.start_url);
        let _ = writeln!(out, "  Started: {}", metadata.started_at.to_rfc3339());
        if let Some(completed) = metadata.completed_at {
            let _ = writeln!(out, "  Completed: {}", completed.to_rfc3339());
        }
        let _ = writeln!(
            out,
            "  Duration: {:.1}s ({:.2} pages/sec)",
            metadata.stats.duration_secs, metadata.stats.pages_per_second
        );
        let _ = writeln!(
            out,
            "  Discovered: {}, skipped: {}, max depth reached: {}",
            metadata.stats.pages_discovered,
            metadata.stats.pages_skipped,
            metadata.stats.max_depth_reached
        );
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Pages stored: {}", stats.total_pages);
    let _ = writeln!(out, "  Links found: {}", stats.total_links);
    let _ = writeln!(out, "  Errors recorded: {}", stats.total_errors);
    let _ = writeln!(out);

    if !stats.pages_by_depth.is_empty() {
        let _ = writeln!(out, "Pages by Depth:");
        for (depth, count) in &stats.pages_by_depth {
            let _ = writeln!(out, "  {}: {}", depth, count);
        }
        let _ = writeln!(out);
    }

    if !stats.link_placements.is_empty() {
        let _ = writeln!(out, "Link Placements:");
        for (placement, count) in sorted_by_count(&stats.link_placements) {
            let _ = writeln!(out, "  {}: {}", placement, count);
        }
        let _ = writeln!(out);
    }

    if !stats.error_summary.is_empty() {
        let _ = writeln!(out, "Error Summary:");
        for (category, count) in sorted_by_count(&stats.error_summary) {
            let _ = writeln!(out, "  {}: {}", category, count);
        }
        let _ = writeln!(out);
    }

    let success_rate = if stats.total_pages > 0 {
        (stats.successful_pages as f64 / stats.total_pages as f64) * 100.0
    } else {
        0.0
    };
    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} pages fetched without error)",
        success_rate, stats.successful_pages, stats.total_pages
    );
    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", format_statistics(stats));
}
