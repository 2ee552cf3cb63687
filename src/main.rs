//! Sumi-SEO main entry point
//!
//! This is the command-line interface for the Sumi-SEO crawler.

use clap::Parser;
use std::path::{Path, PathBuf};
use sumi_seo::config::{load_config_with_hash, Config};
use sumi_seo::crawler::{crawl, generate_crawl_id};
use sumi_seo::output::{export_crawl, load_crawl_statistics, print_statistics};
use sumi_seo::CrawlStatus;
use tracing_subscriber::EnvFilter;

/// Sumi-SEO: a breadth-first SEO crawler
///
/// Sumi-SEO crawls a site from a start URL, extracts on-page SEO signals and the
/// link graph, and stores everything in a per-crawl SQLite database.
#[derive(Parser, Debug)]
#[command(name = "sumi-seo")]
#[command(version = "1.0.0")]
#[command(about = "A breadth-first SEO crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", required_unless_present_any = ["stats", "export"])]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with_all = ["stats", "export"])]
    dry_run: bool,

    /// Show statistics of an existing crawl directory and exit
    #[arg(long, value_name = "CRAWL_DIR", conflicts_with_all = ["dry_run", "export"])]
    stats: Option<PathBuf>,

    /// Write pages.csv for an existing crawl directory and exit
    #[arg(long, value_name = "CRAWL_DIR", conflicts_with_all = ["dry_run", "stats"])]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    if let Some(crawl_dir) = &cli.stats {
        return handle_stats(crawl_dir);
    }
    if let Some(crawl_dir) = &cli.export {
        return handle_export(crawl_dir);
    }

    let Some(config_path) = cli.config else {
        return Err("a configuration file is required".into());
    };

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", config_path.display());
    let (config, config_hash) = match load_config_with_hash(&config_path) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, &config_hash)
    } else {
        handle_crawl(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_seo=info,warn"),
            1 => EnvFilter::new("sumi_seo=debug,info"),
            2 => EnvFilter::new("sumi_seo=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, config_hash: &str) -> Result<(), Box<dyn std::error::Error>> {
    let crawler = &config.crawler;
    let start_url = url::Url::parse(&crawler.start_url)?;
    let crawl_id = crawler.crawl_id.clone().unwrap_or_else(|| {
        generate_crawl_id(start_url.host_str().unwrap_or("crawl"), chrono::Utc::now())
    });

    println!("=== Sumi-SEO Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Start URL: {}", crawler.start_url);
    println!("  Max depth: {}", crawler.max_depth);
    println!("  Max pages: {}", crawler.max_pages);
    println!(
        "  Concurrency: {} - {}",
        crawler.min_concurrency, crawler.max_concurrency
    );
    println!("  Timeout: {}s", crawler.timeout_secs);
    println!(
        "  Retries: {} (base delay {}ms)",
        crawler.max_retries, crawler.retry_delay_ms
    );
    println!("  Crawl external: {}", crawler.crawl_external);
    println!("  Respect robots.txt: {}", crawler.respect_robots_txt);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    let filters = &config.filters;
    println!("\nFilters:");
    println!("  Allowed extensions: {:?}", filters.allowed_extensions);
    println!("  Denied extensions: {}", filters.denied_extensions.len());
    println!("  Include patterns: {:?}", filters.include_patterns);
    println!("  Exclude patterns: {:?}", filters.exclude_patterns);

    println!("\nOutput:");
    println!(
        "  Crawl directory: {}",
        Path::new(&config.output.directory).join(&crawl_id).display()
    );
    println!("  Export CSV: {}", config.output.export_csv);

    println!("\nConfiguration is valid (hash: {})", config_hash);
    Ok(())
}

/// Handles the --stats mode: shows statistics from a crawl directory
fn handle_stats(crawl_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Crawl directory: {}\n", crawl_dir.display());
    let stats = load_crawl_statistics(crawl_dir)?;
    print_statistics(&stats);
    Ok(())
}

/// Handles the --export mode: re-materializes pages.csv
fn handle_export(crawl_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (path, rows) = export_crawl(crawl_dir)?;
    println!("Exported {} pages to {}", rows, path.display());
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Crawling {} (max depth {}, max pages {})",
        config.crawler.start_url,
        config.crawler.max_depth,
        config.crawler.max_pages
    );

    let metadata = crawl(config).await?;
    let stats = &metadata.stats;

    println!("Crawl {}: {}", metadata.crawl_id, metadata.status);
    println!(
        "  crawled: {}, failed: {}, skipped: {}, discovered: {}",
        stats.pages_crawled, stats.pages_failed, stats.pages_skipped, stats.pages_discovered
    );
    println!(
        "  max depth reached: {}, duration: {:.1}s, {:.2} pages/sec",
        stats.max_depth_reached, stats.duration_secs, stats.pages_per_second
    );

    if metadata.status == CrawlStatus::Failed {
        return Err(format!("crawl {} failed", metadata.crawl_id).into());
    }
    Ok(())
}
