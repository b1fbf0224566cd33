//! Errors raised synchronously at configuration and submission time.

use thiserror::Error;

/// Invalid or contradictory submission parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("array_parallelism was given without a map_count")]
    ParallelismWithoutMapCount,
    #[error("array_parallelism must be positive")]
    NonPositiveParallelism,
}

impl ConfigurationError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Unparseable job id, or an array expansion that cannot be performed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Empty job id")]
    Empty,
    #[error("Malformed job id: {0:?}")]
    Malformed(String),
    #[error("Invalid array range in job id {0:?}")]
    InvalidRange(String),
    #[error("Array job id {0:?} cannot be expanded without a task count")]
    MissingTaskCount(String),
    #[error("Array job id {id:?} expands to {count} tasks, more than {max}")]
    TooManyTasks { id: String, count: u64, max: u64 },
}
