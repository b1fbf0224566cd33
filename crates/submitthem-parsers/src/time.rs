//! Time parsing and formatting utilities for scheduler directives and output.

use std::time::Duration;

/// Parse a duration in various formats.
///
/// Supports:
/// - D-HH:MM:SS
/// - HH:MM:SS (PBS walltime)
/// - MM:SS
/// - Seconds as integer
///
/// Returns None for "UNLIMITED", placeholders or empty strings.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "UNLIMITED" || s == "-" || s == "--" {
        return None;
    }

    // Check for day separator (D-HH:MM:SS)
    let parts: Vec<&str> = s.split('-').collect();
    let (days, time_part) = match parts.as_slice() {
        [days, time] => (days.parse::<u64>().ok()?, *time),
        [time] => (0, *time),
        _ => return None,
    };

    let time_parts = time_part
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    let seconds = match time_parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [m, s] => m * 60 + s,
        [s] => *s,
        _ => return None,
    };

    Some(Duration::from_secs(days * 86400 + seconds))
}

/// Format a duration as a PBS time string, e.g. 01:05:02.
///
/// Hours are not wrapped into days: PBS accepts `100:00:00`.
pub fn format_pbs_duration(duration: &Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
