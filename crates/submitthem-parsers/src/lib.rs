//! Shared parsing utilities for scheduler commands and their output.
//!
//! This crate provides the process runner abstraction and the text helpers
//! used by the scheduler backends.

pub mod command;
pub mod memory;
pub mod table;
pub mod time;

pub use command::{
    CommandError, CommandOutput, Invocation, ProcessRunner, RunFuture, ScriptedRunner,
    TokioRunner, run_command,
};
pub use memory::{format_pbs_memory, parse_memory_mb};
pub use table::{TableRow, parse_table};
pub use time::{format_pbs_duration, parse_duration};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed == "--" || trimmed == "N/A" {
        None
    } else {
        Some(trimmed.to_string())
    }
}
