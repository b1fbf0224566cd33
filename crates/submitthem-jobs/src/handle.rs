//! Handles on submitted jobs.

use crate::error::JobError;
use crate::packager::RemoteOutcome;
use crate::paths::JobPaths;
use crate::submitter::Context;
use crate::wait::WaitOptions;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use submitthem_core::{JobIdentifier, JobInfo, JobState, SubmissionConfig};
use submitthem_parsers::CommandError;
use submitthem_state::CheckMode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval between checks for a result file after completion.
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

enum Finished {
    State(JobState),
    Outcome(RemoteOutcome),
}

/// One submitted job, or one task of an array.
///
/// The state is never stored on the handle: every query goes through the
/// shared watcher.
#[derive(Clone)]
pub struct JobHandle {
    id: JobIdentifier,
    config: Arc<SubmissionConfig>,
    paths: JobPaths,
    ctx: Arc<Context>,
}

impl JobHandle {
    pub(crate) fn new(id: JobIdentifier, config: Arc<SubmissionConfig>, ctx: Arc<Context>) -> Self {
        let paths = JobPaths::new(&ctx.folder, &id);
        Self {
            id,
            config,
            paths,
            ctx,
        }
    }

    pub fn job_id(&self) -> &JobIdentifier {
        &self.id
    }

    pub fn main_id(&self) -> &str {
        &self.id.main_id
    }

    /// Configuration snapshot taken at submission.
    pub fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    /// Fresh state, polling the scheduler unless a poll just happened.
    pub async fn state(&self) -> Result<JobState, JobError> {
        Ok(self.ctx.watcher.get_state(&self.id, CheckMode::Force).await?)
    }

    /// Latest raw scheduler record.
    pub async fn info(&self, mode: CheckMode) -> Result<Option<JobInfo>, JobError> {
        Ok(self.ctx.watcher.get_info(&self.id, mode).await?)
    }

    /// Times the job was seen requeued after it started running.
    pub async fn preemptions(&self) -> u32 {
        self.ctx.watcher.preemptions(&self.id).await
    }

    pub async fn done(&self) -> Result<bool, JobError> {
        Ok(self.ctx.watcher.is_done(&self.id, CheckMode::Standard).await?)
    }

    /// Contents of the stdout log, `None` if it does not exist yet.
    pub fn stdout(&self) -> Option<String> {
        std::fs::read_to_string(&self.paths.stdout).ok()
    }

    /// Contents of the stderr log, `None` if it does not exist yet.
    pub fn stderr(&self) -> Option<String> {
        std::fs::read_to_string(&self.paths.stderr).ok()
    }

    /// Ask the scheduler to cancel the job.
    pub async fn cancel(&self) -> Result<(), JobError> {
        let command = self
            .ctx
            .scheduler
            .cancel_command(std::slice::from_ref(&self.id));
        let output = self.ctx.runner.run(&command.program, &command.args).await?;
        if !output.is_success() {
            return Err(CommandError::Failed {
                command: command.to_string(),
                stderr: output.stderr_lossy().trim().to_string(),
            }
            .into());
        }
        tracing::info!("Cancelled job {}", self.id);
        Ok(())
    }

    /// Wait until the job is running (or already finished).
    pub async fn wait_until_running(&self, options: &WaitOptions) -> Result<JobState, JobError> {
        match self.wait_for(options, |state| !state.is_waiting(), false).await? {
            Finished::State(state) => Ok(state),
            Finished::Outcome(_) => Ok(JobState::Completed),
        }
    }

    /// Wait for the job with default options and return its result.
    pub async fn result<R: DeserializeOwned>(&self) -> Result<R, JobError> {
        self.result_with(&WaitOptions::default()).await
    }

    /// Wait for the job to finish and return its result.
    ///
    /// A requeued job keeps the wait going. Failure, walltime kills and
    /// errors raised by the payload surface as [`JobError::RemoteFailure`].
    /// A job the scheduler no longer lists counts as finished once its
    /// result file exists.
    pub async fn result_with<R: DeserializeOwned>(
        &self,
        options: &WaitOptions,
    ) -> Result<R, JobError> {
        let (state, outcome) = match self.wait_for(options, |state| state.is_terminal(), true).await? {
            Finished::Outcome(outcome) => (JobState::Completed, Some(outcome)),
            Finished::State(state) if state != JobState::Completed => {
                let message = match self.ctx.packager.load(&self.paths.result) {
                    Ok(Some(RemoteOutcome::Error { message })) => message,
                    _ => format!("scheduler reported {}", state),
                };
                return Err(self.remote_failure(state, message));
            }
            Finished::State(state) => (state, self.load_result(options).await?),
        };

        match outcome {
            Some(RemoteOutcome::Success { value }) => {
                serde_json::from_value(value).map_err(JobError::Decode)
            }
            Some(RemoteOutcome::Error { message }) => Err(self.remote_failure(state, message)),
            None => Err(JobError::MissingOutput {
                job_id: self.id.to_string(),
                path: self.paths.result.clone(),
                stderr: self.stderr(),
            }),
        }
    }

    fn remote_failure(&self, state: JobState, message: String) -> JobError {
        JobError::RemoteFailure {
            job_id: self.id.to_string(),
            state,
            message,
            stderr: self.stderr(),
        }
    }

    /// Poll until `done` accepts the state. With `watch_result`, a result
    /// file found after the job dropped out of the status output also ends
    /// the wait.
    async fn wait_for(
        &self,
        options: &WaitOptions,
        done: impl Fn(JobState) -> bool,
        watch_result: bool,
    ) -> Result<Finished, JobError> {
        let started = Instant::now();
        let deadline = options.timeout.map(|t| started + t);
        let cancel = options.cancel.clone().unwrap_or_default();
        let mut delay = options.backoff.initial;
        let mut last_state = None;

        loop {
            let state = self.state().await?;
            if done(state) {
                return Ok(Finished::State(state));
            }
            if watch_result {
                if let Some(outcome) = self.result_of_vanished_job().await {
                    return Ok(Finished::Outcome(outcome));
                }
            }
            if last_state != Some(state) {
                tracing::debug!("Job {} is {}", self.id, state);
                last_state = Some(state);
            }

            self.pause(delay, deadline, &cancel, started).await?;
            delay = options.backoff.next(delay);
        }
    }

    /// The result of a job missing from the latest status output, if written.
    async fn result_of_vanished_job(&self) -> Option<RemoteOutcome> {
        if self.ctx.watcher.missing_polls(&self.id).await == 0 {
            return None;
        }
        // A partially written file fails to decode; it is read again next round.
        let outcome = self.ctx.packager.load(&self.paths.result).ok()??;
        tracing::info!(
            "Job {} is no longer listed by the scheduler, using its result file",
            self.id
        );
        Some(outcome)
    }

    async fn load_result(&self, options: &WaitOptions) -> Result<Option<RemoteOutcome>, JobError> {
        let give_up = Instant::now() + options.result_grace;
        let cancel = options.cancel.clone().unwrap_or_default();
        loop {
            if let Some(outcome) = self.ctx.packager.load(&self.paths.result)? {
                return Ok(Some(outcome));
            }
            let now = Instant::now();
            if now >= give_up {
                return Ok(None);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(JobError::Cancelled { job_id: self.id.to_string() });
                }
                _ = tokio::time::sleep(RESULT_POLL_INTERVAL.min(give_up - now)) => {}
            }
        }
    }

    async fn pause(
        &self,
        delay: Duration,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<(), JobError> {
        let now = Instant::now();
        let wake = deadline.map_or(now + delay, |d| d.min(now + delay));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(JobError::Cancelled { job_id: self.id.to_string() });
            }
            _ = tokio::time::sleep_until(wake) => {}
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(JobError::TimedOut {
                job_id: self.id.to_string(),
                waited: started.elapsed(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job<{}>", self.id)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}
