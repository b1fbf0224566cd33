//! Job identifier grammar.
//!
//! Accepted forms (each optionally preceded by the word `job` and whitespace,
//! and optionally followed by `.<domain>`):
//!
//! - `<main>`: plain job
//! - `<main>[]`: array reference before task expansion
//! - `<main>_<index>` or `<main>[<index>]`: one array task
//! - `<main>_[<low>-<high>]`: contiguous range of tasks
//! - `<main>_[<i1>,<i2>,...]`: explicit list of tasks
//!
//! Concrete tasks are always written back in the underscore form.

use crate::error::IdentifierError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?i:job)\s+)?(?P<main>[^\s._\[\]]+)(?:(?P<placeholder>\[\])|\[(?P<bracket>\d+)\]|_(?P<index>\d+)|_\[(?P<set>[^\]]+)\])?(?:\.(?P<domain>\S+))?$",
    )
    .expect("valid job id pattern")
});

static BRACKET_MAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\[").expect("valid bracket pattern"));

static JOB_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i:job)\s+").expect("valid prefix pattern"));

/// Upper bound on the tasks one id may expand to.
pub const MAX_ARRAY_TASKS: u64 = 1_000_000;

/// Array part of a job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayPart {
    /// `[]`: the scheduler-assigned array id before tasks are expanded
    Placeholder,
    /// One concrete task
    Index(String),
    /// Inclusive contiguous range of tasks
    Range(u64, u64),
    /// Explicit list of tasks
    List(Vec<String>),
}

/// Structured view of a scheduler job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentifier {
    pub main_id: String,
    pub array: Option<ArrayPart>,
    pub domain: Option<String>,
}

impl JobIdentifier {
    /// A plain, non-array job.
    pub fn plain(main_id: impl Into<String>) -> Self {
        Self {
            main_id: main_id.into(),
            array: None,
            domain: None,
        }
    }

    /// One concrete task of an array.
    pub fn task(main_id: impl Into<String>, index: u64) -> Self {
        Self {
            main_id: main_id.into(),
            array: Some(ArrayPart::Index(index.to_string())),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    /// Parse a raw job id string.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }

        let caps = JOB_ID_RE
            .captures(raw)
            .ok_or_else(|| IdentifierError::Malformed(raw.to_string()))?;

        let array = if caps.name("placeholder").is_some() {
            Some(ArrayPart::Placeholder)
        } else if let Some(index) = caps.name("bracket").or_else(|| caps.name("index")) {
            Some(ArrayPart::Index(index.as_str().to_string()))
        } else if let Some(set) = caps.name("set") {
            Some(parse_task_set(raw, set.as_str())?)
        } else {
            None
        };

        Ok(Self {
            main_id: caps["main"].to_string(),
            array,
            domain: caps.name("domain").map(|d| d.as_str().to_string()),
        })
    }

    /// Task index, for a concrete array task.
    pub fn array_index(&self) -> Option<&str> {
        match &self.array {
            Some(ArrayPart::Index(index)) => Some(index),
            _ => None,
        }
    }

    /// Inclusive task range, for a range id.
    pub fn array_range(&self) -> Option<(u64, u64)> {
        match self.array {
            Some(ArrayPart::Range(low, high)) => Some((low, high)),
            _ => None,
        }
    }

    pub fn is_array_placeholder(&self) -> bool {
        self.array == Some(ArrayPart::Placeholder)
    }

    /// Whether this id denotes (part of) an array job.
    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }

    /// Both ids belong to the same scheduler submission.
    pub fn same_array(&self, other: &JobIdentifier) -> bool {
        self.main_id == other.main_id
    }

    /// Canonical text without the domain suffix.
    pub fn key(&self) -> String {
        let mut key = self.main_id.clone();
        match &self.array {
            None => {}
            Some(ArrayPart::Placeholder) => key.push_str("[]"),
            Some(ArrayPart::Index(index)) => {
                key.push('_');
                key.push_str(index);
            }
            Some(ArrayPart::Range(low, high)) => {
                key.push_str(&format!("_[{}-{}]", low, high));
            }
            Some(ArrayPart::List(items)) => {
                key.push_str(&format!("_[{}]", items.join(",")));
            }
        }
        key
    }

    /// The array parent reference (`<main>[]`) sharing this id's domain.
    pub fn parent(&self) -> JobIdentifier {
        JobIdentifier {
            main_id: self.main_id.clone(),
            array: self.array.as_ref().map(|_| ArrayPart::Placeholder),
            domain: self.domain.clone(),
        }
    }

    /// Expand a range or list id into its concrete task ids.
    ///
    /// Plain ids and single tasks expand to themselves; placeholders cannot be
    /// expanded without a task count (see [`expand_array`]).
    pub fn tasks(&self) -> Result<Vec<JobIdentifier>, IdentifierError> {
        let make = |index: String| JobIdentifier {
            main_id: self.main_id.clone(),
            array: Some(ArrayPart::Index(index)),
            domain: self.domain.clone(),
        };

        match &self.array {
            None | Some(ArrayPart::Index(_)) => Ok(vec![self.clone()]),
            Some(ArrayPart::Placeholder) => {
                Err(IdentifierError::MissingTaskCount(self.to_string()))
            }
            Some(ArrayPart::Range(low, high)) => {
                self.check_task_count(range_len(*low, *high))?;
                Ok((*low..=*high).map(|i| make(i.to_string())).collect())
            }
            Some(ArrayPart::List(items)) => {
                let count = items.iter().fold(0u64, |total, item| {
                    let len = parse_range(item).map_or(1, |(low, high)| range_len(low, high));
                    total.saturating_add(len)
                });
                self.check_task_count(count)?;
                let mut tasks = Vec::new();
                for item in items {
                    match parse_range(item) {
                        Some((low, high)) => tasks.extend((low..=high).map(|i| make(i.to_string()))),
                        None => tasks.push(make(item.clone())),
                    }
                }
                Ok(tasks)
            }
        }
    }
}

impl JobIdentifier {
    fn check_task_count(&self, count: u64) -> Result<(), IdentifierError> {
        if count > MAX_ARRAY_TASKS {
            return Err(IdentifierError::TooManyTasks {
                id: self.to_string(),
                count,
                max: MAX_ARRAY_TASKS,
            });
        }
        Ok(())
    }
}

fn range_len(low: u64, high: u64) -> u64 {
    (high - low).saturating_add(1)
}

impl fmt::Display for JobIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())?;
        if let Some(domain) = &self.domain {
            write!(f, ".{}", domain)?;
        }
        Ok(())
    }
}

impl FromStr for JobIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Extract the main numeric job id from any supported job id form.
///
/// This is the basis of "same array" comparisons and does not care whether
/// bracket or underscore notation is used.
pub fn extract_main_id(raw: &str) -> String {
    let raw = raw.trim();
    let raw = JOB_PREFIX_RE
        .find(raw)
        .map_or(raw, |prefix| &raw[prefix.end()..]);

    let no_domain = raw.split('.').next().unwrap_or(raw);
    if let Some(caps) = BRACKET_MAIN_RE.captures(no_domain) {
        return caps[1].to_string();
    }
    match no_domain.split_once('_') {
        Some((main, _)) => main.to_string(),
        None => no_domain.to_string(),
    }
}

/// Derive the concrete task ids of an array submission.
///
/// `raw` is the id printed by the submit command. A `<main>[]` id requires a
/// positive `map_count` and expands to `<main>_0 .. <main>_<map_count-1>`,
/// keeping the domain. A plain id expands the same way when `map_count > 1`
/// (schedulers printing the bare main id for arrays), and to itself otherwise.
pub fn expand_array(
    raw: &str,
    map_count: Option<u32>,
) -> Result<Vec<JobIdentifier>, IdentifierError> {
    let id = JobIdentifier::parse(raw)?;
    if let Some(count) = map_count {
        id.check_task_count(u64::from(count))?;
    }

    match (&id.array, map_count) {
        (Some(ArrayPart::Placeholder), Some(count)) if count > 0 => Ok(indexed(&id, count)),
        (Some(ArrayPart::Placeholder), _) => Err(IdentifierError::MissingTaskCount(raw.to_string())),
        (None, Some(count)) if count > 1 => Ok(indexed(&id, count)),
        _ => Ok(vec![id]),
    }
}

fn indexed(id: &JobIdentifier, count: u32) -> Vec<JobIdentifier> {
    (0..u64::from(count))
        .map(|i| JobIdentifier::task(id.main_id.clone(), i).with_domain(id.domain.clone()))
        .collect()
}

fn parse_task_set(raw: &str, set: &str) -> Result<ArrayPart, IdentifierError> {
    // Drop a "%<n>" throttle suffix, as printed by some schedulers.
    let set = set.split('%').next().unwrap_or(set).trim();

    if set.contains(',') {
        let items: Vec<String> = set.split(',').map(|s| s.trim().to_string()).collect();
        let valid = items.iter().all(|item| {
            !item.is_empty()
                && (item.chars().all(|c| c.is_ascii_digit()) || parse_range(item).is_some())
        });
        if !valid {
            return Err(IdentifierError::InvalidRange(raw.to_string()));
        }
        return Ok(ArrayPart::List(items));
    }

    if set.contains('-') {
        return parse_range(set)
            .map(|(low, high)| ArrayPart::Range(low, high))
            .ok_or_else(|| IdentifierError::InvalidRange(raw.to_string()));
    }

    if !set.is_empty() && set.chars().all(|c| c.is_ascii_digit()) {
        return Ok(ArrayPart::Index(set.to_string()));
    }

    Err(IdentifierError::InvalidRange(raw.to_string()))
}

fn parse_range(s: &str) -> Option<(u64, u64)> {
    let (low, high) = s.split_once('-')?;
    let low: u64 = low.trim().parse().ok()?;
    let high: u64 = high.trim().parse().ok()?;
    (low <= high).then_some((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: &str = "3141592653589793";

    #[test]
    fn test_extract_main_id() {
        for raw in [
            "3141592653589793.domain",
            "3141592653589793[].domain",
            "3141592653589793[]",
            "3141592653589793",
            "job 3141592653589793",
            "job 3141592653589793[]",
            "3141592653589793_0",
            "3141592653589793[4].pbs01",
            "3141592653589793_[0-4]",
        ] {
            assert_eq!(extract_main_id(raw), MAIN, "input {raw:?}");
        }
    }

    #[test]
    fn test_parse_forms() {
        let id = JobIdentifier::parse("3141592653589793").unwrap();
        assert_eq!(id, JobIdentifier::plain(MAIN));

        let id = JobIdentifier::parse("3141592653589793.pbs01").unwrap();
        assert_eq!(id.domain.as_deref(), Some("pbs01"));
        assert!(!id.is_array());

        let id = JobIdentifier::parse("3141592653589793[].pbs01.cluster.org").unwrap();
        assert!(id.is_array_placeholder());
        assert_eq!(id.domain.as_deref(), Some("pbs01.cluster.org"));

        let id = JobIdentifier::parse("3141592653589793_0").unwrap();
        assert_eq!(id.array_index(), Some("0"));

        let id = JobIdentifier::parse("3141592653589793[7].pbs01").unwrap();
        assert_eq!(id.array_index(), Some("7"));
        assert_eq!(id.to_string(), "3141592653589793_7.pbs01");

        let id = JobIdentifier::parse("3141592653589793_[0-4]").unwrap();
        assert_eq!(id.array_range(), Some((0, 4)));

        let id = JobIdentifier::parse("3141592653589793_[0,2,4]").unwrap();
        assert_eq!(
            id.array,
            Some(ArrayPart::List(vec!["0".into(), "2".into(), "4".into()]))
        );

        let id = JobIdentifier::parse("job 3141592653589793[]").unwrap();
        assert_eq!(id.main_id, MAIN);
        assert!(id.is_array_placeholder());
    }

    #[test]
    fn test_format_round_trip() {
        for raw in [
            "3141592653589793",
            "3141592653589793.domain",
            "3141592653589793[]",
            "3141592653589793[].domain",
            "3141592653589793_12",
            "3141592653589793_12.domain",
            "3141592653589793_[0-4]",
            "3141592653589793_[0,2,4]",
        ] {
            let id = JobIdentifier::parse(raw).unwrap();
            assert_eq!(id.to_string(), raw);
        }
        let id = JobIdentifier::parse("job 3141592653589793[].domain").unwrap();
        assert_eq!(id.to_string(), "3141592653589793[].domain");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(JobIdentifier::parse("  "), Err(IdentifierError::Empty));
        assert!(matches!(
            JobIdentifier::parse("qsub: illegal -J value"),
            Err(IdentifierError::Malformed(_))
        ));
        assert!(matches!(
            JobIdentifier::parse("12_[4-1]"),
            Err(IdentifierError::InvalidRange(_))
        ));
        assert!(matches!(
            JobIdentifier::parse("12_[a,b]"),
            Err(IdentifierError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_throttle_suffix_is_dropped() {
        let id = JobIdentifier::parse("12_[0-9%5]").unwrap();
        assert_eq!(id.array_range(), Some((0, 9)));
    }

    #[test]
    fn test_key_strips_domain() {
        let id = JobIdentifier::parse("6122024[3].pbs01").unwrap();
        assert_eq!(id.key(), "6122024_3");
        assert_eq!(id.parent().to_string(), "6122024[].pbs01");
        assert_eq!(JobIdentifier::parse("6122024.srv").unwrap().parent().key(), "6122024");
    }

    #[test]
    fn test_expand_array() {
        let tasks = expand_array("6122024[].pbs01", Some(3)).unwrap();
        let rendered: Vec<String> = tasks.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["6122024_0.pbs01", "6122024_1.pbs01", "6122024_2.pbs01"]
        );
        assert!(tasks.iter().all(|t| t.same_array(&tasks[0])));

        let tasks = expand_array("6122024", Some(2)).unwrap();
        assert_eq!(tasks[1].to_string(), "6122024_1");

        let single = expand_array("6122024.pbs01", None).unwrap();
        assert_eq!(single, vec![JobIdentifier::parse("6122024.pbs01").unwrap()]);
    }

    #[test]
    fn test_expand_placeholder_without_count() {
        assert!(matches!(
            expand_array("6122024[]", None),
            Err(IdentifierError::MissingTaskCount(_))
        ));
        assert!(matches!(
            expand_array("6122024[]", Some(0)),
            Err(IdentifierError::MissingTaskCount(_))
        ));
    }

    #[test]
    fn test_tasks_expands_range_and_list() {
        let range = JobIdentifier::parse("12_[0-2]").unwrap().tasks().unwrap();
        assert_eq!(range.len(), 3);
        assert_eq!(range[2].key(), "12_2");

        let list = JobIdentifier::parse("12_[0,4-5]").unwrap().tasks().unwrap();
        let keys: Vec<String> = list.iter().map(JobIdentifier::key).collect();
        assert_eq!(keys, vec!["12_0", "12_4", "12_5"]);
    }

    #[test]
    fn test_oversized_expansion_is_rejected() {
        let huge = JobIdentifier::parse("17_[0-18446744073709551615]").unwrap();
        assert!(matches!(
            huge.tasks(),
            Err(IdentifierError::TooManyTasks { count: u64::MAX, .. })
        ));

        let list = JobIdentifier::parse("17_[0,1-2000000]").unwrap();
        assert!(matches!(list.tasks(), Err(IdentifierError::TooManyTasks { .. })));

        assert!(matches!(
            expand_array("17[]", Some(u32::MAX)),
            Err(IdentifierError::TooManyTasks { .. })
        ));
    }
}
