//! Grouping submissions into one array job.

use crate::error::SubmissionError;
use crate::handle::JobHandle;
use crate::submitter::{Submitter, to_value};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use submitthem_core::SubmissionConfig;

/// Captures submissions and sends them as a single array on [`close`].
///
/// Nothing reaches the scheduler before `close`. Dropping the batch without
/// closing it discards everything it captured.
///
/// [`close`]: ArrayBatch::close
#[must_use = "a batch submits nothing unless it is closed"]
pub struct ArrayBatch<'a> {
    submitter: &'a Submitter,
    entries: Vec<(Arc<SubmissionConfig>, Value)>,
}

impl<'a> ArrayBatch<'a> {
    pub(crate) fn new(submitter: &'a Submitter) -> Self {
        Self {
            submitter,
            entries: Vec::new(),
        }
    }

    /// Capture a payload with the submitter's current configuration.
    pub fn submit<P: Serialize>(&mut self, payload: &P) -> Result<(), SubmissionError> {
        let config = self.submitter.config().clone();
        self.submit_with_config(payload, config)
    }

    pub fn submit_with_config<P: Serialize>(
        &mut self,
        payload: &P,
        config: SubmissionConfig,
    ) -> Result<(), SubmissionError> {
        self.entries.push((Arc::new(config), to_value(payload)?));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Submit everything captured as one scheduler submission.
    ///
    /// Handles come back in capture order. A single entry is submitted as an
    /// ordinary job; an empty batch submits nothing.
    pub async fn close(mut self) -> Result<Vec<JobHandle>, SubmissionError> {
        let entries = std::mem::take(&mut self.entries);
        self.submitter.dispatch(entries).await
    }
}

impl Drop for ArrayBatch<'_> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                "Discarding {} captured submission(s) from an unclosed batch",
                self.entries.len()
            );
        }
    }
}
