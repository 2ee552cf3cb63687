/// Fetch state definitions for tracking a URL through the worker pool
use std::fmt;

/// Represents where a URL is in the fetch pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchState {
    /// Accepted into the fetch queue, waiting for a worker slot
    Queued,

    /// A worker is fetching it (including retries)
    InFlight,

    /// Fetched and processed
    Done,

    /// Retry budget exhausted or processing failed
    Failed,
}

impl FetchState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the transition `self -> next` is legal
    ///
    /// The only legal path is Queued -> InFlight -> {Done, Failed}.
    pub fn can_transition_to(&self, next: FetchState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::InFlight)
                | (Self::InFlight, Self::Done)
                | (Self::InFlight, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
