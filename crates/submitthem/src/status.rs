//! Query the state of job ids given on the command line.

use std::sync::Arc;
use submitthem_core::{IdentifierError, JobIdentifier, JobInfo, JobState, Scheduler, expand_array};
use submitthem_parsers::ProcessRunner;
use submitthem_state::{CheckMode, InfoWatcher, PollError, WatcherConfig};

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub id: JobIdentifier,
    pub state: JobState,
    pub preemptions: u32,
    pub queue: Option<String>,
}

/// Expand the raw ids into the concrete jobs to query.
pub fn resolve_ids(
    scheduler: &dyn Scheduler,
    raw: &[String],
    map_count: Option<u32>,
) -> Result<Vec<JobIdentifier>, IdentifierError> {
    let mut ids = Vec::new();
    for raw in raw {
        let id = scheduler.parse_id(raw)?;
        if id.is_array_placeholder() {
            ids.extend(expand_array(raw, map_count)?);
        } else {
            ids.extend(id.tasks()?);
        }
    }
    Ok(ids)
}

/// Poll once and report every id.
pub async fn query(
    scheduler: Arc<dyn Scheduler>,
    runner: Arc<dyn ProcessRunner>,
    ids: &[JobIdentifier],
    attempts: u32,
) -> Result<Vec<StatusLine>, PollError> {
    let config = WatcherConfig {
        max_poll_attempts: attempts,
        ..WatcherConfig::default()
    };
    let watcher = InfoWatcher::new(scheduler, runner, config)
        .with_span(tracing::info_span!("status"));
    for id in ids {
        watcher.register_job(id).await;
    }
    watcher.force_update().await?;

    let mut lines = Vec::with_capacity(ids.len());
    for id in ids {
        let info: Option<JobInfo> = watcher.get_info(id, CheckMode::Cache).await?;
        lines.push(StatusLine {
            id: id.clone(),
            state: info.as_ref().map_or(JobState::Unknown, |i| i.state),
            preemptions: info.as_ref().map_or(0, |i| i.preemptions),
            queue: info.as_ref().and_then(|i| i.field("Queue")).map(str::to_string),
        });
    }
    Ok(lines)
}
