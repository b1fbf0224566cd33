//! Parse `qstat` output: the `-f -F json` full format, or a status table.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use submitthem_core::{JobIdentifier, JobInfo, JobState};
use submitthem_parsers::{non_empty_string, parse_table};

/// PBS exit status for a job killed at its walltime limit.
const EXIT_WALLTIME_EXCEEDED: i32 = -29;

const STATE_COLUMNS: &[&str] = &["S", "State", "job_state"];
const EXIT_COLUMNS: &[&str] = &["Exit_status", "Exit", "Exit Status", "ExitStatus"];

/// Map a PBS state letter (or an already-normalized state word).
pub fn parse_state(s: &str) -> JobState {
    match s.trim().to_uppercase().as_str() {
        "F" | "C" | "X" | "COMPLETED" => JobState::Completed,
        "Q" | "H" | "W" | "T" | "S" | "U" | "PENDING" => JobState::Pending,
        "R" | "E" | "B" | "RUNNING" => JobState::Running,
        "FAILED" => JobState::Failed,
        "TIMEOUT" => JobState::Timeout,
        _ => JobState::Unknown,
    }
}

fn is_job_header(line: &str) -> bool {
    line.to_lowercase().contains("job id")
}

fn column<'a>(row: &'a HashMap<&str, &str>, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| row.get(name).copied())
}

/// Normalized state of one record, using the exit status of finished jobs.
fn record_state(fields: &HashMap<&str, &str>) -> JobState {
    let state = column(fields, STATE_COLUMNS).map_or(JobState::Unknown, parse_state);
    if state != JobState::Completed {
        return state;
    }
    let exit = column(fields, EXIT_COLUMNS)
        .and_then(non_empty_string)
        .and_then(|s| s.parse::<i32>().ok());
    match exit {
        Some(EXIT_WALLTIME_EXCEEDED) => JobState::Timeout,
        Some(0) | None => JobState::Completed,
        Some(_) => JobState::Failed,
    }
}

fn insert_record(
    infos: &mut HashMap<String, JobInfo>,
    raw_id: &str,
    row: BTreeMap<String, String>,
) {
    let id = match JobIdentifier::parse(raw_id) {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!("Skipping qstat record: {}", e);
            return;
        }
    };
    let fields: HashMap<&str, &str> = row
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let state = record_state(&fields);
    infos.insert(id.key(), JobInfo::new(state, row));
}

/// Parse `qstat` output into records keyed by [`JobIdentifier::key`].
///
/// JSON output (`-F json`) is read from its `Jobs` object, anything else as
/// a status table. Records whose id cannot be parsed are skipped.
pub fn read_info(raw: &[u8]) -> HashMap<String, JobInfo> {
    let text = String::from_utf8_lossy(raw);
    if text.trim_start().starts_with('{') {
        match serde_json::from_str::<Value>(&text) {
            Ok(data) => return read_json(&data),
            Err(e) => tracing::debug!("qstat output is not valid JSON: {}", e),
        }
    }
    read_table(&text)
}

fn read_json(data: &Value) -> HashMap<String, JobInfo> {
    let mut infos = HashMap::new();
    let Some(jobs) = data.get("Jobs").and_then(Value::as_object) else {
        return infos;
    };
    for (raw_id, attributes) in jobs {
        let mut row = BTreeMap::new();
        if let Some(attributes) = attributes.as_object() {
            flatten_attributes("", attributes, &mut row);
        }
        row.insert("Job Id".to_string(), raw_id.clone());
        insert_record(&mut infos, raw_id, row);
    }
    infos
}

/// Scalar attributes as strings; nested objects become `Parent.child` keys.
fn flatten_attributes(
    prefix: &str,
    attributes: &serde_json::Map<String, Value>,
    row: &mut BTreeMap<String, String>,
) {
    for (name, value) in attributes {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        match value {
            Value::String(s) => {
                row.insert(key, s.clone());
            }
            Value::Number(n) => {
                row.insert(key, n.to_string());
            }
            Value::Bool(b) => {
                row.insert(key, b.to_string());
            }
            Value::Object(inner) => flatten_attributes(&key, inner, row),
            Value::Array(_) | Value::Null => {}
        }
    }
}

fn read_table(text: &str) -> HashMap<String, JobInfo> {
    let mut infos = HashMap::new();
    for row in parse_table(text, is_job_header) {
        let Some(raw_id) = row
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("job id"))
            .map(|(_, value)| value.clone())
        else {
            continue;
        };
        insert_record(&mut infos, &raw_id, row);
    }
    infos
}
