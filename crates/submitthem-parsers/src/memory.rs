//! Memory parsing and formatting utilities for PBS resource strings.

/// Parse a memory string to megabytes.
///
/// Accepts PBS-style sizes ("16gb", "512mb", "2048kb", "1tb"), the
/// single-letter variants ("16G", "512M"), and bare numbers, which are taken
/// as megabytes. Case-insensitive.
///
/// Returns None for empty strings or placeholder values.
pub fn parse_memory_mb(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() || s == "-" || s == "--" {
        return None;
    }

    let unit_start = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let value: f64 = s[..unit_start].parse().ok()?;
    let unit = s[unit_start..].trim();

    let mb = match unit {
        "tb" | "t" => value * 1024.0 * 1024.0,
        "gb" | "g" => value * 1024.0,
        "mb" | "m" | "" => value,
        "kb" | "k" => value / 1024.0,
        "b" => value / (1024.0 * 1024.0),
        _ => return None,
    };
    Some(mb as u64)
}

/// Format a memory request for a PBS `select` chunk.
///
/// Whole gigabytes are written as `<n>gb`, anything else is rounded up to
/// whole megabytes.
pub fn format_pbs_memory(mem_gb: f64) -> String {
    if mem_gb.fract() == 0.0 {
        format!("{}gb", mem_gb as u64)
    } else {
        format!("{}mb", (mem_gb * 1024.0).ceil() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_mb() {
        assert_eq!(parse_memory_mb("16gb"), Some(16384));
        assert_eq!(parse_memory_mb("4G"), Some(4096));
        assert_eq!(parse_memory_mb("1000mb"), Some(1000));
        assert_eq!(parse_memory_mb("4096kb"), Some(4));
        assert_eq!(parse_memory_mb("4096"), Some(4096));
        assert_eq!(parse_memory_mb("1.5gb"), Some(1536));
        assert_eq!(parse_memory_mb(""), None);
        assert_eq!(parse_memory_mb("--"), None);
        assert_eq!(parse_memory_mb("12parsecs"), None);
    }

    #[test]
    fn test_format_pbs_memory() {
        assert_eq!(format_pbs_memory(16.0), "16gb");
        assert_eq!(format_pbs_memory(0.5), "512mb");
        assert_eq!(format_pbs_memory(1.25), "1280mb");
    }
}
