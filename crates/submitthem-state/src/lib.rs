//! Job state tracking for submitthem.
//!
//! The [`InfoWatcher`] caches scheduler status records for every registered
//! job and refreshes them with one status query at a time.

pub mod config;
pub mod merge;
pub mod watcher;

pub use config::{CheckMode, WatcherConfig};
pub use merge::merge_record;
pub use watcher::{InfoWatcher, PollError};
