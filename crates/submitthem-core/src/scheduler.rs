//! The capability trait implemented by every scheduler backend.
//!
//! Backends are pure translators: they build scripts and command lines and
//! parse command output. Running the commands is left to the caller's
//! process runner.

use crate::config::SubmissionConfig;
use crate::error::{ConfigurationError, IdentifierError};
use crate::job_id::JobIdentifier;
use crate::state::JobInfo;
use camino::Utf8Path;
use std::collections::HashMap;
use std::fmt;

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Everything needed to render one submission script.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRequest<'a> {
    /// Shell command line run by the job
    pub command: &'a str,
    /// Name used when the config carries none
    pub job_name: &'a str,
    pub config: &'a SubmissionConfig,
    /// Folder holding the job's logs and payloads
    pub folder: &'a Utf8Path,
    /// Number of array tasks, if this is an array submission
    pub map_count: Option<u32>,
    /// Cap on concurrently running tasks
    pub array_parallelism: Option<u32>,
}

/// A batch scheduler backend.
pub trait Scheduler: Send + Sync {
    /// Short backend name, used in logs.
    fn name(&self) -> &'static str;

    /// Render the submission script for one job or one array.
    fn build_script(&self, request: &ScriptRequest<'_>) -> Result<String, ConfigurationError>;

    /// Command submitting the script at `script`.
    fn submit_command(&self, script: &Utf8Path) -> CommandLine;

    /// Extract the job id from the submit command's stdout.
    fn parse_submit_output(&self, stdout: &str) -> Result<JobIdentifier, IdentifierError>;

    /// One status query covering every id in `ids`.
    fn status_command(&self, ids: &[JobIdentifier]) -> CommandLine;

    /// Parse status output into records keyed by [`JobIdentifier::key`].
    fn read_info(&self, raw: &[u8]) -> HashMap<String, JobInfo>;

    /// Whether a non-zero status query exit only reports ids the scheduler
    /// no longer (or not yet) knows, in which case stdout is still usable.
    fn is_benign_status_failure(&self, stderr: &str) -> bool;

    /// Command cancelling every id in `ids`.
    fn cancel_command(&self, ids: &[JobIdentifier]) -> CommandLine;

    fn parse_id(&self, raw: &str) -> Result<JobIdentifier, IdentifierError> {
        JobIdentifier::parse(raw)
    }
}
