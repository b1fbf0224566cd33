//! Watcher configuration.

use std::time::Duration;

/// How fresh an answer must be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckMode {
    /// Answer from the cache, never poll
    Cache,
    /// Poll only when the cache is older than the refresh interval
    #[default]
    Standard,
    /// Poll now, unless a poll just completed
    Force,
}

/// Configuration for the info watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Forced polls within this window of the last poll reuse its result.
    pub debounce: Duration,
    /// Age after which a standard check triggers a poll.
    pub refresh_interval: Duration,
    /// Attempts per poll before the failure is returned.
    pub max_poll_attempts: u32,
    /// Base delay between failed attempts, multiplied by the attempt number.
    pub poll_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(5),
            max_poll_attempts: 3,
            poll_backoff: Duration::from_millis(500),
        }
    }
}

impl WatcherConfig {
    /// No debounce and no backoff.
    pub fn immediate() -> Self {
        Self {
            debounce: Duration::ZERO,
            refresh_interval: Duration::ZERO,
            max_poll_attempts: 1,
            poll_backoff: Duration::ZERO,
        }
    }
}
