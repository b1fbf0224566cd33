//! Submission configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use submitthem_parsers::{parse_duration, parse_memory_mb};

/// Longest accepted walltime: one hundred years.
const MAX_WALLTIME_MIN: u64 = 100 * 365 * 24 * 60;

/// Resources and metadata for one logical unit of work.
///
/// Fields left as `None` produce no directive at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Job name (`-N`)
    pub job_name: Option<String>,

    /// Walltime in minutes
    pub walltime_min: Option<u64>,

    /// CPUs per task (`ncpus`)
    pub cpus_per_task: Option<u32>,

    /// Number of select chunks (nodes)
    pub nodes: Option<u32>,

    /// Memory per chunk in GB
    pub mem_gb: Option<f64>,

    /// GPUs per chunk (`ngpus`)
    pub gpus_per_node: Option<u32>,

    /// Partition / queue (`-q`)
    pub partition: Option<String>,

    /// Node placement constraint
    pub constraint: Option<String>,

    /// Free-form comment, written into the script
    pub comment: Option<String>,

    /// Environment variables exported to the job
    pub environment: BTreeMap<String, String>,

    /// Maximum number of concurrently running array tasks
    pub array_parallelism: Option<u32>,

    /// Scheduler flags without a dedicated field, passed through verbatim
    pub additional_parameters: BTreeMap<String, String>,
}

impl SubmissionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.walltime_min = Some(walltime.as_secs().div_ceil(60));
        self
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus_per_task = Some(cpus);
        self
    }

    pub fn with_mem_gb(mut self, mem_gb: f64) -> Self {
        self.mem_gb = Some(mem_gb);
        self
    }

    pub fn with_gpus(mut self, gpus: u32) -> Self {
        self.gpus_per_node = Some(gpus);
        self
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// A zero cap is rejected when the script is built.
    pub fn with_array_parallelism(mut self, parallelism: u32) -> Self {
        self.array_parallelism = Some(parallelism);
        self
    }

    /// Walltime as a duration.
    pub fn walltime(&self) -> Option<Duration> {
        self.walltime_min
            .map(|m| Duration::from_secs(m.saturating_mul(60)))
    }

    /// Apply keyword-style overrides.
    ///
    /// Every key is validated before anything is applied, so a failed update
    /// leaves the configuration untouched. A `null` value clears the field.
    pub fn update_parameters(&mut self, params: &Map<String, Value>) -> Result<(), ConfigurationError> {
        let mut updated = self.clone();
        for (key, value) in params {
            updated.apply(key, value)?;
        }
        *self = updated;
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &Value) -> Result<(), ConfigurationError> {
        match key {
            "name" | "job_name" => self.job_name = opt_string(key, value)?,
            "time" | "timeout_min" | "pbs_time" | "walltime_min" | "walltime" => {
                self.walltime_min = opt_minutes(key, value)?
            }
            "cpus_per_task" | "pbs_ncpus" => self.cpus_per_task = opt_positive(key, value)?,
            "nodes" => self.nodes = opt_positive(key, value)?,
            "mem_gb" => self.mem_gb = opt_mem_gb(key, value)?,
            "mem" => {
                self.mem_gb = match value {
                    Value::Null => None,
                    Value::String(s) => Some(
                        parse_memory_mb(s)
                            .filter(|mb| *mb > 0)
                            .map(|mb| mb as f64 / 1024.0)
                            .ok_or_else(|| ConfigurationError::invalid(key, "unparseable memory size"))?,
                    ),
                    _ => return Err(ConfigurationError::invalid(key, "expected a size string")),
                }
            }
            "gpus_per_node" | "pbs_ngpus" => {
                // Zero GPUs means no GPU request at all.
                self.gpus_per_node = opt_u32(key, value)?.filter(|g| *g > 0)
            }
            "partition" | "queue" | "pbs_queue" => self.partition = opt_string(key, value)?,
            "constraint" | "pbs_constraint" => self.constraint = opt_string(key, value)?,
            "comment" | "pbs_comment" => self.comment = opt_string(key, value)?,
            "environment" => self.environment = string_map(key, value)?,
            "array_parallelism" => {
                if value.as_u64() == Some(0) {
                    return Err(ConfigurationError::NonPositiveParallelism);
                }
                self.array_parallelism = opt_positive(key, value)?
            }
            "additional_parameters" | "pbs_additional_parameters" => {
                self.additional_parameters.extend(string_map(key, value)?)
            }
            other => return Err(ConfigurationError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }
}

fn opt_string(key: &str, value: &Value) -> Result<Option<String>, ConfigurationError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Value::String(_) => Err(ConfigurationError::invalid(key, "empty string")),
        _ => Err(ConfigurationError::invalid(key, "expected a string")),
    }
}

fn opt_u32(key: &str, value: &Value) -> Result<Option<u32>, ConfigurationError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ConfigurationError::invalid(key, "expected a non-negative integer")),
        _ => Err(ConfigurationError::invalid(key, "expected an integer")),
    }
}

fn opt_positive(key: &str, value: &Value) -> Result<Option<u32>, ConfigurationError> {
    match opt_u32(key, value)? {
        Some(0) => Err(ConfigurationError::invalid(key, "must be positive")),
        other => Ok(other),
    }
}

fn opt_minutes(key: &str, value: &Value) -> Result<Option<u64>, ConfigurationError> {
    let minutes = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => match n.as_u64() {
            Some(minutes) if minutes > 0 => minutes,
            _ => return Err(ConfigurationError::invalid(key, "must be a positive number of minutes")),
        },
        Value::String(s) => parse_duration(s)
            .filter(|d| !d.is_zero())
            .map(|d| d.as_secs().div_ceil(60))
            .ok_or_else(|| ConfigurationError::invalid(key, "expected HH:MM:SS"))?,
        _ => return Err(ConfigurationError::invalid(key, "expected minutes or HH:MM:SS")),
    };
    if minutes > MAX_WALLTIME_MIN {
        return Err(ConfigurationError::invalid(
            key,
            format!("more than {} minutes", MAX_WALLTIME_MIN),
        ));
    }
    Ok(Some(minutes))
}

fn opt_mem_gb(key: &str, value: &Value) -> Result<Option<f64>, ConfigurationError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match n.as_f64() {
            Some(gb) if gb > 0.0 && gb.is_finite() => Ok(Some(gb)),
            _ => Err(ConfigurationError::invalid(key, "must be positive")),
        },
        _ => Err(ConfigurationError::invalid(key, "expected a number")),
    }
}

fn string_map(key: &str, value: &Value) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let Value::Object(map) = value else {
        return Err(ConfigurationError::invalid(key, "expected a mapping"));
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(ConfigurationError::invalid(key, format!("bad value for {}", k))),
            };
            Ok((k.clone(), v))
        })
        .collect()
}
