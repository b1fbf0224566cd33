//! Log file templates shared by the script builder and job handles.
//!
//! Single jobs use `%j` (the job id); array tasks use `%A_%a` (array id and
//! task index).

use crate::job_id::JobIdentifier;
use camino::{Utf8Path, Utf8PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    fn extension(self) -> &'static str {
        match self {
            Self::Stdout => "out",
            Self::Stderr => "err",
        }
    }
}

/// Unresolved log path, as written into a submission script.
pub fn log_template(folder: &Utf8Path, is_array: bool, stream: LogStream) -> Utf8PathBuf {
    let stem = if is_array { "%A_%a" } else { "%j" };
    folder.join(format!("{}_0_log.{}", stem, stream.extension()))
}

/// Substitute a concrete job id into a template.
pub fn resolve_template(template: &str, id: &JobIdentifier) -> String {
    let index = id.array_index().unwrap_or("0");
    template
        .replace("%A", &id.main_id)
        .replace("%a", index)
        .replace("%j", &id.key())
}

/// Concrete log path of one job or array task.
pub fn log_path(folder: &Utf8Path, id: &JobIdentifier, stream: LogStream) -> Utf8PathBuf {
    let template = log_template(folder, id.array_index().is_some(), stream);
    Utf8PathBuf::from(resolve_template(template.as_str(), id))
}
