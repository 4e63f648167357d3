//! Job identity, states, and accumulated metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::ResourceRequest;

/// Unique identifier for a batch job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a job ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a batch job
///
/// The legal chain is Pending, Queued, Scheduled, Running, then
/// Completed or Failed. Cancelled is reachable from every non-terminal
/// state. Nothing else is a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted, waiting to enter the queue
    Pending,
    /// In the queue, waiting for placement
    Queued,
    /// Placed on capacity, not yet executing
    Scheduled,
    /// Executing; the only state that accepts metrics
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped before completion
    Cancelled,
}

impl JobState {
    /// Whether the job can never leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, Queued)
            | (Queued, Scheduled)
            | (Scheduled, Running)
            | (Running, Completed)
            | (Running, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Usage counters reported by whatever executes the job
///
/// Values are cumulative totals, not deltas. Merging keeps the maximum
/// per counter so a late or out-of-order report can never shrink what
/// has already been billed for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Elapsed wall-clock time in seconds
    #[serde(default)]
    pub wall_clock_seconds: u64,
    /// CPU core-seconds consumed
    #[serde(default)]
    pub cpu_core_seconds: u64,
    /// Memory GB-seconds consumed
    #[serde(default)]
    pub memory_gb_seconds: u64,
    /// GPU device-seconds consumed
    #[serde(default)]
    pub gpu_seconds: u64,
    /// Distinct nodes the job ran on
    #[serde(default)]
    pub nodes_used: u32,
    /// Node-hours consumed
    #[serde(default)]
    pub node_hours: f64,
}

impl JobMetrics {
    /// Merge a newer cumulative report in, keeping each counter's maximum
    pub fn merge_from(&mut self, other: &JobMetrics) {
        self.wall_clock_seconds = self.wall_clock_seconds.max(other.wall_clock_seconds);
        self.cpu_core_seconds = self.cpu_core_seconds.max(other.cpu_core_seconds);
        self.memory_gb_seconds = self.memory_gb_seconds.max(other.memory_gb_seconds);
        self.gpu_seconds = self.gpu_seconds.max(other.gpu_seconds);
        self.nodes_used = self.nodes_used.max(other.nodes_used);
        self.node_hours = self.node_hours.max(other.node_hours);
    }
}

/// A batch job as the scheduler tracks it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// Compute the job asked for
    pub resources: ResourceRequest,
    /// Requested runtime ceiling, in seconds
    pub max_runtime_secs: u64,
    /// Current lifecycle state
    pub state: JobState,
    /// Cumulative usage counters
    pub metrics: JobMetrics,
    /// When the job was submitted
    pub submitted_at: DateTime<Utc>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a freshly submitted job in Pending
    pub fn new(id: JobId, resources: ResourceRequest, max_runtime_secs: u64) -> Self {
        Self {
            id,
            resources,
            max_runtime_secs,
            state: JobState::Pending,
            metrics: JobMetrics::default(),
            submitted_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_chain() {
        use JobState::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
    }

    #[test]
    fn test_skipping_states_is_illegal() {
        use JobState::*;
        assert!(!Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Running));
        assert!(!Running.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn test_cancel_reachable_from_non_terminal_only() {
        use JobState::*;
        for from in [Pending, Queued, Scheduled, Running] {
            assert!(from.can_transition_to(Cancelled), "{from} must be cancellable");
        }
        for from in [Completed, Failed, Cancelled] {
            assert!(!from.can_transition_to(Cancelled), "{from} must not be cancellable");
        }
    }

    #[test]
    fn test_metrics_merge_never_decreases() {
        let mut metrics = JobMetrics {
            cpu_core_seconds: 100,
            wall_clock_seconds: 50,
            ..Default::default()
        };
        metrics.merge_from(&JobMetrics {
            cpu_core_seconds: 40,
            wall_clock_seconds: 60,
            gpu_seconds: 5,
            ..Default::default()
        });

        assert_eq!(metrics.cpu_core_seconds, 100, "stale counter must not shrink");
        assert_eq!(metrics.wall_clock_seconds, 60);
        assert_eq!(metrics.gpu_seconds, 5);
    }
}
