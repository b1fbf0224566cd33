//! Submitting work to a batch scheduler and collecting its results.
//!
//! A [`Submitter`] turns payloads into scheduler jobs and returns
//! [`JobHandle`]s; an [`ArrayBatch`] groups many payloads into one array
//! submission.

pub mod batch;
pub mod error;
pub mod handle;
pub mod packager;
pub mod paths;
pub mod submitter;
pub mod wait;

pub use batch::ArrayBatch;
pub use error::{JobError, SubmissionError};
pub use handle::JobHandle;
pub use packager::{JsonPackager, Packager, PackagingError, RemoteOutcome};
pub use paths::JobPaths;
pub use submitter::Submitter;
pub use wait::{Backoff, WaitOptions};
