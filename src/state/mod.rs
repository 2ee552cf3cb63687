//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlStatus`: lifecycle of a crawl session (queued, running, completed, failed)
//! - `FetchState`: where a single URL is in the fetch pipeline (queued, in flight, done, failed)

mod crawl_status;
mod fetch_state;

// Re-export main types
pub use crawl_status::CrawlStatus;
pub use fetch_state::FetchState;
