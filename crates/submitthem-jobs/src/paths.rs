//! Files belonging to one job.

use camino::{Utf8Path, Utf8PathBuf};
use submitthem_core::{JobIdentifier, LogStream, log_path};

/// Locations of a job's script, logs and payload files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub folder: Utf8PathBuf,
    /// Domain-less job id, used to name the files
    pub job_key: String,
    /// Script shared by every task of an array
    pub submission_file: Utf8PathBuf,
    pub stdout: Utf8PathBuf,
    pub stderr: Utf8PathBuf,
    pub submitted_payload: Utf8PathBuf,
    pub result: Utf8PathBuf,
}

impl JobPaths {
    pub fn new(folder: &Utf8Path, id: &JobIdentifier) -> Self {
        let job_key = id.key();
        Self {
            folder: folder.to_path_buf(),
            submission_file: folder.join(format!("{}_submission.sh", id.main_id)),
            stdout: log_path(folder, id, LogStream::Stdout),
            stderr: log_path(folder, id, LogStream::Stderr),
            submitted_payload: folder.join(format!("{}_submitted.json", job_key)),
            result: folder.join(format!("{}_result.json", job_key)),
            job_key,
        }
    }
}
