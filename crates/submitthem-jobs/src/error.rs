//! Submission and job errors.

use crate::packager::PackagingError;
use camino::Utf8PathBuf;
use std::time::Duration;
use submitthem_core::{ConfigurationError, IdentifierError, JobState};
use submitthem_parsers::CommandError;
use submitthem_state::PollError;
use thiserror::Error;

/// The scheduler did not accept a submission. No handle is produced.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to run submit command: {0}")]
    Command(#[from] CommandError),
    #[error("{command} failed: {stderr}")]
    Rejected { command: String, stderr: String },
    #[error("Could not read job id from {output:?}: {source}")]
    Unparseable {
        output: String,
        source: IdentifierError,
    },
    #[error("Expected {expected} job ids, scheduler reported {actual}")]
    TaskCountMismatch { expected: usize, actual: usize },
    #[error("All submissions of an array must share one configuration")]
    MixedConfigurations,
    #[error("Failed to stage payload: {0}")]
    Packaging(#[from] PackagingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while waiting for, or inspecting, a submitted job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("Job {job_id} ended in state {state}: {message}")]
    RemoteFailure {
        job_id: String,
        state: JobState,
        message: String,
        /// Contents of the job's stderr log, if it exists
        stderr: Option<String>,
    },
    #[error("Waiting for job {job_id} was cancelled")]
    Cancelled { job_id: String },
    #[error("Job {job_id} did not finish within {waited:?}")]
    TimedOut { job_id: String, waited: Duration },
    #[error("Job {job_id} completed without writing {path}")]
    MissingOutput {
        job_id: String,
        path: Utf8PathBuf,
        /// Contents of the job's stderr log, if it exists
        stderr: Option<String>,
    },
    #[error("Failed to read job result: {0}")]
    Packaging(#[from] PackagingError),
    #[error("Job result has an unexpected shape: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
}
