//! Merge a freshly polled record into the cached one.

use submitthem_core::{JobInfo, JobState};

/// Replace `previous` with `fresh`, carrying over the preemption count.
///
/// A job seen running and then pending again has been requeued: the counter
/// is bumped and the state reported as [`JobState::Preempted`] until the job
/// runs or finishes.
pub fn merge_record(previous: Option<&JobInfo>, mut fresh: JobInfo) -> JobInfo {
    let Some(previous) = previous else {
        return fresh;
    };

    fresh.preemptions = previous.preemptions;
    match (previous.state, fresh.state) {
        (JobState::Running, JobState::Pending) => {
            fresh.preemptions += 1;
            fresh.state = JobState::Preempted;
        }
        (JobState::Preempted, JobState::Pending | JobState::Unknown) => {
            fresh.state = JobState::Preempted;
        }
        _ => {}
    }
    fresh
}
