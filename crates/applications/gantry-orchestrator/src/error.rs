//! Orchestrator error type

use thiserror::Error;

use gantry_core::{AdapterError, ResourceId};
use gantry_scheduler::SchedulerError;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors from the orchestration engine and its configuration
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad or incomplete startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No configured backend satisfies the request's selector
    #[error("No backend matches selector: {0}")]
    NoBackend(String),

    /// The registry has no entry for this resource
    #[error("Unknown resource: {0}")]
    UnknownResource(ResourceId),

    /// A backend adapter failed; the class drives retry policy
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The job scheduler rejected an operation
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Reading a configuration or manifest file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
