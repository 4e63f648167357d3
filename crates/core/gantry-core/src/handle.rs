//! Resource identity and the normalized lifecycle model
//!
//! Every backend reports its own state vocabulary; adapters map it into
//! [`ResourceState`] so the orchestrator reasons about one lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapter::BackendKind;

/// Backend-assigned identifier for a provisioned resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    /// Wrap a backend-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Marketplace identifier for a deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub String);

impl DeploymentId {
    /// Wrap a marketplace deployment identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marketplace identifier for the lease funding a deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub String);

impl LeaseId {
    /// Wrap a marketplace lease identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of backend object a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Compute server or virtual machine
    Server,
    /// Virtual network
    Network,
    /// Block storage volume
    Volume,
    /// Network attachment port
    Port,
    /// Virtual router
    Router,
    /// Floating IP address
    FloatingIp,
    /// Security group
    SecurityGroup,
    /// Set of externally-managed hosts driven as one unit
    HostSet,
}

/// Normalized lifecycle state shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource is provisioned and running
    Active,
    /// Resource exists but is powered off
    Stopped,
    /// Execution frozen, resource still resident on the backend
    Paused,
    /// Resource state saved to disk, released from the backend host
    Suspended,
    /// Last operation left the resource in an unknown or failed state.
    /// Not cleaned up automatically; reconciliation must decide.
    Error,
    /// Resource no longer exists on the backend
    Deleted,
}

impl ResourceState {
    /// Whether the resource can serve its workload
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceState::Active => "active",
            ResourceState::Stopped => "stopped",
            ResourceState::Paused => "paused",
            ResourceState::Suspended => "suspended",
            ResourceState::Error => "error",
            ResourceState::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// Orchestrator-tracked reference to one provisioned resource
///
/// A handle is only handed out once its resource reached a ready state;
/// callers never observe a handle to something half-built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Backend-assigned identifier
    pub id: ResourceId,
    /// Kind of backend object
    pub kind: ResourceKind,
    /// Normalized lifecycle state at the time of the last observation
    pub state: ResourceState,
    /// Backend that owns the resource
    pub backend: BackendKind,
    /// Deployment this resource belongs to
    pub deployment_id: DeploymentId,
    /// Lease funding the deployment
    pub lease_id: LeaseId,
    /// Identity tag of the provider that created the resource
    pub provider_tag: String,
    /// When the resource first reached a ready state
    pub created_at: DateTime<Utc>,
}

impl ResourceHandle {
    /// Build a handle for a resource that just reached [`ResourceState::Active`]
    pub fn active(
        id: ResourceId,
        kind: ResourceKind,
        backend: BackendKind,
        deployment_id: DeploymentId,
        lease_id: LeaseId,
        provider_tag: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            state: ResourceState::Active,
            backend,
            deployment_id,
            lease_id,
            provider_tag: provider_tag.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_display() {
        let id = ResourceId::new("srv-42");
        assert_eq!(id.to_string(), "srv-42");
        assert_eq!(id.as_str(), "srv-42");
    }

    #[test]
    fn test_only_active_is_ready() {
        assert!(ResourceState::Active.is_ready());
        assert!(!ResourceState::Stopped.is_ready());
        assert!(!ResourceState::Paused.is_ready());
        assert!(!ResourceState::Suspended.is_ready());
        assert!(!ResourceState::Error.is_ready());
        assert!(!ResourceState::Deleted.is_ready());
    }

    #[test]
    fn test_error_is_not_terminal() {
        // Error handles stay reconcilable; only Deleted is final.
        assert!(!ResourceState::Error.is_terminal());
        assert!(ResourceState::Deleted.is_terminal());
    }

    #[test]
    fn test_active_handle_constructor() {
        let handle = ResourceHandle::active(
            ResourceId::new("vm-1"),
            ResourceKind::Server,
            BackendKind::OpenStack,
            DeploymentId::new("dep-1"),
            LeaseId::new("lease-1"),
            "dc-test",
        );
        assert_eq!(handle.state, ResourceState::Active);
        assert_eq!(handle.provider_tag, "dc-test");
        assert!(handle.state.is_ready());
    }
}
