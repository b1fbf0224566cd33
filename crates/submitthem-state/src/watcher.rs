//! The info watcher: a polling, caching view of job states.

use crate::config::{CheckMode, WatcherConfig};
use crate::merge::merge_record;
use std::collections::HashMap;
use std::sync::Arc;
use submitthem_core::{CommandLine, JobIdentifier, JobInfo, JobState, Scheduler};
use submitthem_parsers::{CommandError, ProcessRunner};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Span;

/// The status command could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Failed to query job status: {0}")]
    Command(#[from] CommandError),
    #[error("{command} exited with status {code:?}: {stderr}")]
    Status {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Clone)]
struct Tracked {
    id: JobIdentifier,
    info: Option<JobInfo>,
    missing_polls: u32,
}

impl Tracked {
    fn new(id: JobIdentifier) -> Self {
        Self {
            id,
            info: None,
            missing_polls: 0,
        }
    }

    fn is_terminal(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.state.is_terminal())
    }
}

#[derive(Debug, Default)]
struct Cache {
    jobs: HashMap<String, Tracked>,
    /// When the last successful poll finished
    last_poll: Option<Instant>,
}

/// Shared, polling cache of scheduler status records.
///
/// One instance is shared (behind an `Arc`) by every handle of a submitter.
/// At most one status query runs at a time; callers that waited for a
/// running query reuse its result instead of issuing their own.
pub struct InfoWatcher {
    scheduler: Arc<dyn Scheduler>,
    runner: Arc<dyn ProcessRunner>,
    config: WatcherConfig,
    cache: Mutex<Cache>,
    poll_lock: Mutex<()>,
    span: Span,
}

impl InfoWatcher {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        runner: Arc<dyn ProcessRunner>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            scheduler,
            runner,
            config,
            cache: Mutex::new(Cache::default()),
            poll_lock: Mutex::new(()),
            span: tracing::info_span!("info_watcher"),
        }
    }

    /// Emit this watcher's events under `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Start tracking `id`. Registering twice is a no-op.
    pub async fn register_job(&self, id: &JobIdentifier) {
        let mut cache = self.cache.lock().await;
        cache
            .jobs
            .entry(id.key())
            .or_insert_with(|| Tracked::new(id.clone()));
    }

    /// Parse raw status output with the backend's parser.
    pub fn read_info(&self, raw: &[u8]) -> HashMap<String, JobInfo> {
        self.scheduler.read_info(raw)
    }

    /// Merge parsed records into the cache, registering unknown ids.
    pub async fn merge(&self, infos: HashMap<String, JobInfo>) {
        let mut cache = self.cache.lock().await;
        for (key, info) in infos {
            if !cache.jobs.contains_key(&key) {
                match JobIdentifier::parse(&key) {
                    Ok(id) => {
                        cache.jobs.insert(key.clone(), Tracked::new(id));
                    }
                    Err(e) => {
                        tracing::debug!(parent: &self.span, "Ignoring record: {}", e);
                        continue;
                    }
                }
            }
            if let Some(tracked) = cache.jobs.get_mut(&key) {
                self.apply(tracked, info);
            }
        }
    }

    /// Whether the job reached a terminal state.
    pub async fn is_done(&self, id: &JobIdentifier, mode: CheckMode) -> Result<bool, PollError> {
        Ok(self.get_state(id, mode).await?.is_terminal())
    }

    /// Current state; [`JobState::Unknown`] if the scheduler never reported it.
    pub async fn get_state(&self, id: &JobIdentifier, mode: CheckMode) -> Result<JobState, PollError> {
        Ok(self
            .get_info(id, mode)
            .await?
            .map_or(JobState::Unknown, |info| info.state))
    }

    /// Latest record for `id`, registering it if needed.
    pub async fn get_info(
        &self,
        id: &JobIdentifier,
        mode: CheckMode,
    ) -> Result<Option<JobInfo>, PollError> {
        self.register_job(id).await;
        self.refresh(mode).await?;
        let cache = self.cache.lock().await;
        Ok(cache.jobs.get(&id.key()).and_then(|t| t.info.clone()))
    }

    /// Consecutive polls that did not mention `id`.
    pub async fn missing_polls(&self, id: &JobIdentifier) -> u32 {
        let cache = self.cache.lock().await;
        cache.jobs.get(&id.key()).map_or(0, |t| t.missing_polls)
    }

    /// Number of observed requeues of `id`.
    pub async fn preemptions(&self, id: &JobIdentifier) -> u32 {
        let cache = self.cache.lock().await;
        cache
            .jobs
            .get(&id.key())
            .and_then(|t| t.info.as_ref())
            .map_or(0, |info| info.preemptions)
    }

    /// Keys of every registered job.
    pub async fn tracked(&self) -> Vec<String> {
        let cache = self.cache.lock().await;
        let mut keys: Vec<String> = cache.jobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Poll now, subject to debouncing.
    pub async fn force_update(&self) -> Result<(), PollError> {
        self.refresh(CheckMode::Force).await
    }

    async fn refresh(&self, mode: CheckMode) -> Result<(), PollError> {
        match mode {
            CheckMode::Cache => Ok(()),
            CheckMode::Standard => {
                let stale = {
                    let cache = self.cache.lock().await;
                    cache
                        .last_poll
                        .is_none_or(|t| t.elapsed() >= self.config.refresh_interval)
                };
                if stale {
                    self.collapsed_poll().await
                } else {
                    Ok(())
                }
            }
            CheckMode::Force => self.collapsed_poll().await,
        }
    }

    async fn collapsed_poll(&self) -> Result<(), PollError> {
        let requested_at = Instant::now();
        let _guard = self.poll_lock.lock().await;

        let last_poll = self.cache.lock().await.last_poll;
        if let Some(last) = last_poll {
            if last >= requested_at || last.elapsed() < self.config.debounce {
                tracing::trace!(parent: &self.span, "Reusing poll finished {:?} ago", last.elapsed());
                return Ok(());
            }
        }

        self.poll().await
    }

    async fn poll(&self) -> Result<(), PollError> {
        let mut ids: Vec<JobIdentifier> = {
            let cache = self.cache.lock().await;
            cache
                .jobs
                .values()
                .filter(|t| !t.is_terminal())
                .map(|t| t.id.clone())
                .collect()
        };
        if ids.is_empty() {
            return Ok(());
        }
        ids.sort_by_key(|id| id.key());

        let command = self.scheduler.status_command(&ids);
        let stdout = self.run_status(&command).await?;
        let mut infos = self.scheduler.read_info(&stdout);

        let mut cache = self.cache.lock().await;
        for id in &ids {
            let key = id.key();
            let Some(tracked) = cache.jobs.get_mut(&key) else {
                continue;
            };
            match infos.remove(&key) {
                Some(info) => self.apply(tracked, info),
                None => {
                    tracked.missing_polls += 1;
                    tracing::debug!(
                        parent: &self.span,
                        job_id = %key,
                        missing_polls = tracked.missing_polls,
                        "Job not listed by {}",
                        command.program
                    );
                }
            }
        }
        cache.last_poll = Some(Instant::now());
        Ok(())
    }

    fn apply(&self, tracked: &mut Tracked, info: JobInfo) {
        let previous = tracked.info.take();
        let merged = merge_record(previous.as_ref(), info);

        if merged.preemptions > previous.as_ref().map_or(0, |p| p.preemptions) {
            tracing::info!(
                parent: &self.span,
                job_id = %tracked.id,
                preemptions = merged.preemptions,
                "Job was requeued after running"
            );
        } else if previous.as_ref().map(|p| p.state) != Some(merged.state) {
            tracing::debug!(parent: &self.span, job_id = %tracked.id, state = %merged.state, "State changed");
        }

        tracked.missing_polls = 0;
        tracked.info = Some(merged);
    }

    async fn run_status(&self, command: &CommandLine) -> Result<Vec<u8>, PollError> {
        let max_attempts = self.config.max_poll_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_status_once(command).await {
                Ok(stdout) => return Ok(stdout),
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        parent: &self.span,
                        "Status query failed (attempt {}/{}): {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    tokio::time::sleep(self.config.poll_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(parent: &self.span, "Status query failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn run_status_once(&self, command: &CommandLine) -> Result<Vec<u8>, PollError> {
        let output = self.runner.run(&command.program, &command.args).await?;
        if output.is_success() {
            return Ok(output.stdout);
        }

        let stderr = output.stderr_lossy();
        if self.scheduler.is_benign_status_failure(&stderr) {
            tracing::debug!(parent: &self.span, "{}", stderr.trim());
            return Ok(output.stdout);
        }

        Err(PollError::Status {
            command: command.to_string(),
            code: output.exit_code,
            stderr: stderr.trim().to_string(),
        })
    }
}
