//! Batch job lifecycle scheduling
//!
//! Jobs that do not map to a VM lifecycle run through this crate
//! instead: submitted Pending, driven along
//! Pending -> Queued -> Scheduled -> Running -> Completed/Failed with
//! Cancelled reachable from any non-terminal state. The executor is
//! external; it reports state and cumulative metrics through the
//! scheduler's seams, and every terminal transition synchronously hands
//! a frozen [`TerminalSnapshot`] to the registered [`TerminalSink`],
//! which is where usage reporting hangs off.

pub mod error;
pub mod job;
pub mod scheduler;

pub use error::SchedulerError;
pub use job::{Job, JobId, JobMetrics, JobState};
pub use scheduler::{JobScheduler, TerminalSink, TerminalSnapshot};
