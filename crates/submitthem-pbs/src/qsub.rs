//! `qsub` output and PBS-native id rendering.

use submitthem_core::{ArrayPart, IdentifierError, JobIdentifier};

/// Parse the id printed by `qsub`, e.g. `4242.pbs01` or `4242[].pbs01`.
///
/// Some sites print banners before the id, so the last non-empty line wins.
pub fn parse_submit_output(stdout: &str) -> Result<JobIdentifier, IdentifierError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or(IdentifierError::Empty)?;
    JobIdentifier::parse(line)
}

/// Render an id the way PBS commands expect it.
///
/// Concrete tasks use brackets (`4242[3].pbs01`) rather than the underscore
/// form used for cache keys.
pub fn pbs_form(id: &JobIdentifier) -> String {
    let mut out = id.main_id.clone();
    match &id.array {
        None => {}
        Some(ArrayPart::Placeholder) => out.push_str("[]"),
        Some(ArrayPart::Index(index)) => out.push_str(&format!("[{}]", index)),
        Some(ArrayPart::Range(low, high)) => out.push_str(&format!("[{}-{}]", low, high)),
        Some(ArrayPart::List(items)) => out.push_str(&format!("[{}]", items.join(","))),
    }
    if let Some(domain) = &id.domain {
        out.push('.');
        out.push_str(domain);
    }
    out
}
