//! Core types shared by the submitthem scheduler backends.
//!
//! Submission configuration, the job identifier grammar, the normalized job
//! state machine and the [`Scheduler`] capability trait live here.

pub mod config;
pub mod error;
pub mod job_id;
pub mod paths;
pub mod scheduler;
pub mod state;

pub use config::SubmissionConfig;
pub use error::{ConfigurationError, IdentifierError};
pub use job_id::{ArrayPart, JobIdentifier, MAX_ARRAY_TASKS, expand_array, extract_main_id};
pub use paths::{LogStream, log_path, log_template, resolve_template};
pub use scheduler::{CommandLine, Scheduler, ScriptRequest};
pub use state::{JobInfo, JobState};
