//! Backend task handles
//!
//! Mutating calls against this backend return a [`TaskId`] immediately;
//! the real outcome arrives later through task status polls. `Success`
//! is the only state that permits the next step of a sequence.

use gantry_core::{AdapterError, ResourceId};

/// Identifier of an in-flight backend task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Wrap a backend-assigned task identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a backend task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Accepted, not started
    Queued,
    /// Executing
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Error,
}

impl TaskState {
    /// Whether the task can still make progress
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// One observation of a task
#[derive(Debug, Clone)]
pub struct TaskStatus {
    /// Current lifecycle state
    pub state: TaskState,
    /// Error detail, set when `state` is [`TaskState::Error`]
    pub message: Option<String>,
    /// Entity the task produced, set on Success for creation tasks
    pub entity: Option<ResourceId>,
}

impl TaskStatus {
    /// An in-flight observation
    pub fn in_flight(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            entity: None,
        }
    }

    /// A successful completion, optionally naming the produced entity
    pub fn success(entity: Option<ResourceId>) -> Self {
        Self {
            state: TaskState::Success,
            message: None,
            entity,
        }
    }

    /// A failed completion
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: TaskState::Error,
            message: Some(message.into()),
            entity: None,
        }
    }
}

/// Classify a task failure message into the shared error taxonomy
///
/// The backend reports task failures as text; capacity and permission
/// failures still need to surface as their permanent classes so the
/// orchestrator never retries them.
pub fn classify_task_error(task: &TaskId, message: &str) -> AdapterError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient") || lower.contains("quota") || lower.contains("capacity") {
        AdapterError::quota(format!("task {task}: {message}"))
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("privilege")
    {
        AdapterError::auth(format!("task {task}: {message}"))
    } else {
        AdapterError::backend(format!("task {task}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_states() {
        assert!(TaskState::Queued.is_in_flight());
        assert!(TaskState::Running.is_in_flight());
        assert!(!TaskState::Success.is_in_flight());
        assert!(!TaskState::Error.is_in_flight());
    }

    #[test]
    fn test_classification_of_task_failures() {
        let task = TaskId::new("task-1");
        assert!(matches!(
            classify_task_error(&task, "Insufficient capacity on datastore ds0"),
            AdapterError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_task_error(&task, "Permission to perform this operation was denied"),
            AdapterError::AuthDenied(_)
        ));
        assert!(matches!(
            classify_task_error(&task, "The operation is not allowed in the current state"),
            AdapterError::Backend(_)
        ));
    }
}
