//! Scheduler error type

use thiserror::Error;

use crate::job::{JobId, JobState};

/// Errors from the job scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job with this ID was ever submitted
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    /// A job with this ID already exists
    #[error("Duplicate job: {0}")]
    DuplicateJob(JobId),

    /// The requested transition is not legal from the current state
    #[error("Illegal transition for job {job}: {from} -> {to}")]
    IllegalTransition {
        /// Job the transition was attempted on
        job: JobId,
        /// State the job is in
        from: JobState,
        /// State the caller asked for
        to: JobState,
    },

    /// Metrics are accepted only while the job is running
    #[error("Metrics rejected for job {job}: state is {state}")]
    MetricsFrozen {
        /// Job the metrics were reported for
        job: JobId,
        /// State the job is in
        state: JobState,
    },
}
