//! [`Scheduler`] implementation for PBS Pro / Torque.

use crate::{qstat, qsub, script};
use camino::Utf8Path;
use std::collections::HashMap;
use submitthem_core::{
    CommandLine, ConfigurationError, IdentifierError, JobIdentifier, JobInfo, Scheduler,
    ScriptRequest,
};
use submitthem_parsers::{ProcessRunner, run_command};

/// The PBS backend.
#[derive(Debug, Clone, Default)]
pub struct Pbs;

impl Pbs {
    pub fn new() -> Self {
        Self
    }
}

/// Ids as passed to `qstat`/`qdel`: array tasks collapse onto their parent,
/// duplicates are dropped and the first-seen order is kept.
fn query_ids(ids: &[JobIdentifier], collapse_tasks: bool) -> Vec<String> {
    let mut seen = Vec::new();
    for id in ids {
        let target = if collapse_tasks && id.is_array() {
            qsub::pbs_form(&id.parent())
        } else {
            qsub::pbs_form(id)
        };
        if !seen.contains(&target) {
            seen.push(target);
        }
    }
    seen
}

impl Scheduler for Pbs {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn build_script(&self, request: &ScriptRequest<'_>) -> Result<String, ConfigurationError> {
        script::build_script(request)
    }

    fn submit_command(&self, script: &Utf8Path) -> CommandLine {
        CommandLine::new("qsub").arg(script.as_str())
    }

    fn parse_submit_output(&self, stdout: &str) -> Result<JobIdentifier, IdentifierError> {
        qsub::parse_submit_output(stdout)
    }

    fn status_command(&self, ids: &[JobIdentifier]) -> CommandLine {
        CommandLine::new("qstat")
            .args(["-f", "-F", "json", "-x", "-t"])
            .args(query_ids(ids, true))
    }

    fn read_info(&self, raw: &[u8]) -> HashMap<String, JobInfo> {
        qstat::read_info(raw)
    }

    fn is_benign_status_failure(&self, stderr: &str) -> bool {
        let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
        !lines.is_empty()
            && lines
                .iter()
                .all(|line| line.to_lowercase().contains("unknown job id"))
    }

    fn cancel_command(&self, ids: &[JobIdentifier]) -> CommandLine {
        CommandLine::new("qdel").args(query_ids(ids, false))
    }
}

/// Whether PBS client tools are available on this host.
pub async fn detect(runner: &dyn ProcessRunner) -> bool {
    match run_command(runner, "qstat", &["--version".to_string()]).await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("PBS not detected: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use submitthem_parsers::{CommandOutput, ScriptedRunner};

    #[test]
    fn test_status_command_collapses_tasks() {
        let ids = vec![
            JobIdentifier::parse("4242_0.pbs01").unwrap(),
            JobIdentifier::parse("4242_1.pbs01").unwrap(),
            JobIdentifier::parse("4243.pbs01").unwrap(),
        ];
        let cmd = Pbs.status_command(&ids);
        assert_eq!(cmd.program, "qstat");
        assert_eq!(
            cmd.args,
            vec!["-f", "-F", "json", "-x", "-t", "4242[].pbs01", "4243.pbs01"]
        );
    }

    #[test]
    fn test_cancel_command_keeps_tasks() {
        let ids = vec![JobIdentifier::parse("4242_1.pbs01").unwrap()];
        assert_eq!(Pbs.cancel_command(&ids).to_string(), "qdel 4242[1].pbs01");
    }

    #[test]
    fn test_submit_command() {
        let cmd = Pbs.submit_command(Utf8Path::new("/jobs/.submission_file_ab12.sh"));
        assert_eq!(cmd.to_string(), "qsub /jobs/.submission_file_ab12.sh");
    }

    #[test]
    fn test_benign_status_failure() {
        assert!(Pbs.is_benign_status_failure("qstat: Unknown Job Id 12.pbs01\n"));
        assert!(!Pbs.is_benign_status_failure("qstat: cannot connect to server pbs01 (errno=111)\n"));
        assert!(!Pbs.is_benign_status_failure(""));
    }

    #[tokio::test]
    async fn test_detect() {
        let runner = ScriptedRunner::new();
        runner.push("qstat", CommandOutput::success("pbs_version = 2022.1.1\n"));
        assert!(detect(&runner).await);
        runner.push_spawn_error("qstat", "No such file or directory");
        assert!(!detect(&runner).await);
        runner.push("qstat", CommandOutput::failure(1, "qstat: cannot connect to server"));
        assert!(!detect(&runner).await);
    }
}
