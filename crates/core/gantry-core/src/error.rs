//! Error taxonomy shared by every backend adapter
//!
//! Adapters translate raw backend failures into exactly one of these
//! classes. The orchestrator keys ALL of its retry and cleanup policy
//! off the class, never the message text.

use std::time::Duration;
use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Classified failure of a backend operation
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Missing or invalid startup configuration. Fatal, raised before
    /// any backend call is attempted.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Manifest failed validation and was rejected at intake.
    #[error("Manifest rejected: {0}")]
    Manifest(String),

    /// Transient backend failure (network drop, backend busy). Safe to
    /// retry with backoff.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Quota or capacity exhausted on the backend. Retrying against the
    /// same backend cannot succeed.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The referenced resource does not exist on the backend.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The backend rejected the credentials or denied the operation.
    #[error("Authorization denied: {0}")]
    AuthDenied(String),

    /// The backend cannot perform this operation for this resource.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The backend reported a definitive failure for the operation.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A mutating call returned without a definitive outcome. The
    /// resource must be reconciled before it is trusted again.
    #[error("Indeterminate outcome: {0}")]
    Indeterminate(String),

    /// The operation was still in flight when the deadline expired.
    /// The backend may yet finish it; this is not a definitive failure.
    #[error("Operation still pending after {0:?}")]
    StillPending(Duration),

    /// The surrounding operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a manifest rejection
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a quota error
    pub fn quota(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an authorization error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthDenied(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a definitive backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an indeterminate-outcome error
    pub fn indeterminate(msg: impl Into<String>) -> Self {
        Self::Indeterminate(msg.into())
    }

    /// Whether a retry with backoff may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether retrying can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Manifest(_)
                | Self::QuotaExceeded(_)
                | Self::NotFound(_)
                | Self::AuthDenied(_)
                | Self::Unsupported(_)
                | Self::Backend(_)
        )
    }

    /// Whether the resource needs reconciliation before further use
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, Self::Indeterminate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        assert!(AdapterError::transient("connection reset").is_retryable());
        assert!(!AdapterError::transient("connection reset").is_permanent());
    }

    #[test]
    fn test_permanent_classes_are_not_retryable() {
        let errors = [
            AdapterError::quota("cores exhausted"),
            AdapterError::not_found("srv-1"),
            AdapterError::auth("token expired"),
            AdapterError::unsupported("pause"),
            AdapterError::config("missing endpoint"),
            AdapterError::backend("clone task failed"),
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err} must not be retryable");
            assert!(err.is_permanent(), "{err} must be permanent");
        }
    }

    #[test]
    fn test_indeterminate_needs_reconciliation() {
        let err = AdapterError::indeterminate("connection dropped mid-call");
        assert!(err.needs_reconciliation());
        assert!(!err.is_retryable());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_still_pending_is_not_permanent() {
        let err = AdapterError::StillPending(Duration::from_secs(300));
        assert!(!err.is_permanent());
        assert!(!err.is_retryable());
    }
}
