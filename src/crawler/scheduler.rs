//! Scheduler for the fetch queue and the adaptive worker limit
//!
//! This module handles:
//! - FIFO queue of URLs waiting for a worker slot
//! - Per-URL fetch state (queued, in flight, done, failed)
//! - The page cap, enforced by refusing new enqueues
//! - A concurrency limit that grows on success and shrinks on throttling

use crate::state::FetchState;
use std::collections::{HashMap, VecDeque};
use url::Url;

/// A URL queued for fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUrl {
    /// The URL to fetch
    pub url: Url,

    /// Normalized form, used as the state key
    pub key: String,

    /// Depth recorded in the frontier
    pub depth: u32,
}

/// Why an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueRefusal {
    /// The page cap has been reached
    PageCap,
    /// The URL already has a fetch state
    AlreadyScheduled,
}

/// Scheduler manages the fetch queue and worker slots
///
/// Every URL that is accepted counts against `max_pages`, so the number of pages
/// fetched in a session can never exceed the cap.
#[derive(Debug)]
pub struct Scheduler {
    queue: VecDeque<QueuedUrl>,
    states: HashMap<String, FetchState>,
    max_pages: usize,
    min_concurrency: usize,
    max_concurrency: usize,
    limit: usize,
    in_flight: usize,
}

impl Scheduler {
    /// Creates a scheduler whose worker limit starts at `min_concurrency`
    pub fn new(max_pages: u32, min_concurrency: u32, max_concurrency: u32) -> Self {
        let min = min_concurrency.max(1) as usize;
        let max = (max_concurrency as usize).max(min);
        Self {
            queue: VecDeque::new(),
            states: HashMap::new(),
            max_pages: max_pages as usize,
            min_concurrency: min,
            max_concurrency: max,
            limit: min,
            in_flight: 0,
        }
    }

    /// Adds a URL to the back of the queue
    pub fn enqueue(&mut self, queued: QueuedUrl) -> Result<(), EnqueueRefusal> {
        if self.states.contains_key(&queued.key) {
            return Err(EnqueueRefusal::AlreadyScheduled);
        }
        if self.is_full() {
            return Err(EnqueueRefusal::PageCap);
        }
        self.states.insert(queued.key.clone(), FetchState::Queued);
        self.queue.push_back(queued);
        Ok(())
    }

    /// True once `max_pages` URLs have been accepted
    pub fn is_full(&self) -> bool {
        self.states.len() >= self.max_pages
    }

    /// Pops the next URL if a worker slot is free, moving it to in-flight
    pub fn next_ready(&mut self) -> Option<QueuedUrl> {
        if self.in_flight >= self.limit {
            return None;
        }
        let queued = self.queue.pop_front()?;
        if self.transition(&queued.key, FetchState::InFlight) {
            self.in_flight += 1;
        }
        Some(queued)
    }

    /// Marks an in-flight URL as fetched and processed
    pub fn mark_done(&mut self, key: &str) {
        self.finish(key, FetchState::Done);
    }

    /// Marks an in-flight URL as failed
    pub fn mark_failed(&mut self, key: &str) {
        self.finish(key, FetchState::Failed);
    }

    fn finish(&mut self, key: &str, next: FetchState) {
        if self.transition(key, next) {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }

    fn transition(&mut self, key: &str, next: FetchState) -> bool {
        match self.states.get_mut(key) {
            Some(state) if state.can_transition_to(next) => {
                *state = next;
                true
            }
            Some(state) => {
                tracing::warn!("Ignoring fetch state change {} -> {} for {}", state, next, key);
                false
            }
            None => {
                tracing::warn!("No fetch state for {}", key);
                false
            }
        }
    }

    /// Grows the worker limit by one slot, up to the maximum
    pub fn record_success(&mut self) {
        if self.limit < self.max_concurrency {
            self.limit += 1;
        }
    }

    /// Shrinks the worker limit by one slot, never below the minimum
    pub fn record_throttle(&mut self) {
        if self.limit > self.min_concurrency {
            self.limit -= 1;
            tracing::debug!("Throttled, concurrency limit now {}", self.limit);
        }
    }

    pub fn state(&self, key: &str) -> Option<FetchState> {
        self.states.get(key).copied()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued and nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0
    }
}
