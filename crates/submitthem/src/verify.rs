//! Inspect the submission scripts of a job folder.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;

/// What one submission script asks the scheduler for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    pub path: Utf8PathBuf,
    /// Values of every `-J` directive (more than one is an error)
    pub array_ranges: Vec<String>,
    pub select: Option<String>,
    pub walltime: Option<String>,
}

impl ScriptReport {
    pub fn is_array(&self) -> bool {
        !self.array_ranges.is_empty()
    }

    /// Problems worth flagging, empty if the script looks sound.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.array_ranges.len() > 1 {
            problems.push(format!("{} array directives", self.array_ranges.len()));
        }
        if self.select.is_none() {
            problems.push("no select resource".to_string());
        }
        problems
    }
}

fn is_submission_script(name: &str) -> bool {
    (name.starts_with(".submission_file_") || name.ends_with("_submission.sh"))
        && name.ends_with(".sh")
}

/// Parse the `#PBS` directives of one script.
pub fn inspect(path: &Utf8Path, content: &str) -> ScriptReport {
    let mut report = ScriptReport {
        path: path.to_path_buf(),
        array_ranges: Vec::new(),
        select: None,
        walltime: None,
    };

    for line in content.lines() {
        let Some(directive) = line.trim().strip_prefix("#PBS") else {
            continue;
        };
        let directive = directive.trim();
        if let Some(range) = directive.strip_prefix("-J") {
            report.array_ranges.push(range.trim().to_string());
        } else if let Some(resource) = directive.strip_prefix("-l") {
            let resource = resource.trim();
            if let Some(select) = resource.strip_prefix("select=") {
                report.select = Some(select.to_string());
            } else if let Some(walltime) = resource.strip_prefix("walltime=") {
                report.walltime = Some(walltime.to_string());
            }
        }
    }
    report
}

/// Inspect every submission script in `folder`, sorted by file name.
pub fn verify_folder(folder: &Utf8Path) -> io::Result<Vec<ScriptReport>> {
    let mut reports = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_submission_script(&name) {
            continue;
        }
        let path = folder.join(&name);
        let content = fs::read_to_string(&path)?;
        reports.push(inspect(&path, &content));
    }
    reports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(reports)
}
