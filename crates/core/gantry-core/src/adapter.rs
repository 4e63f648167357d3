//! The backend capability contract
//!
//! All provisioning backends implement [`CloudAdapter`]. The
//! orchestrator works through this interface ONLY; nothing above the
//! adapters may name a concrete backend type.
//!
//! Contract rules every implementation must honor:
//!
//! - `deploy` returns a handle only once the resource reached a ready
//!   state. Callers never see a half-built resource.
//! - `delete` is idempotent. Deleting an unknown or already-deleted
//!   resource succeeds, so cleanup paths can retry safely.
//! - Adapters do NOT serialize concurrent calls against the same
//!   resource. The orchestrator owns that ordering.
//! - Every failure is classified per [`AdapterError`]; errors are
//!   returned, never logged and swallowed.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{AdapterError, Result};
use crate::handle::{DeploymentId, LeaseId, ResourceHandle, ResourceId, ResourceState};
use crate::manifest::{Manifest, ResourceRequest};

/// Which provisioning backend owns a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenStack-style IaaS: synchronous create, poll until ready
    OpenStack,
    /// vSphere-style virtualization: task handle per mutating call
    VSphere,
    /// Ansible-style: playbooks against externally-provisioned hosts
    Ansible,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::OpenStack => write!(f, "openstack"),
            BackendKind::VSphere => write!(f, "vsphere"),
            BackendKind::Ansible => write!(f, "ansible"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openstack" => Ok(BackendKind::OpenStack),
            "vsphere" => Ok(BackendKind::VSphere),
            "ansible" => Ok(BackendKind::Ansible),
            other => Err(AdapterError::config(format!("unknown backend {other:?}"))),
        }
    }
}

/// How the marketplace pinned a deployment to a backend
///
/// Selection is resolved exactly once, at intake. The chosen backend is
/// recorded on the deployment and never re-evaluated mid-flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelector {
    /// The lease names the backend family outright
    Backend(BackendKind),
    /// Route to whichever configured backend carries this provider tag
    ProviderTag(String),
}

/// A provisioning request routed to exactly one adapter
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Deployment the resources belong to
    pub deployment_id: DeploymentId,
    /// Lease funding the deployment
    pub lease_id: LeaseId,
    /// Validated manifest, immutable from here on
    pub manifest: Manifest,
}

impl DeployRequest {
    /// Create a deploy request
    pub fn new(deployment_id: DeploymentId, lease_id: LeaseId, manifest: Manifest) -> Self {
        Self {
            deployment_id,
            lease_id,
            manifest,
        }
    }

    /// Backend-visible name for the deployment's primary resource
    pub fn resource_name(&self) -> String {
        format!("{}-{}", self.deployment_id, self.lease_id)
    }
}

/// Per-deployment knobs that do not belong in the manifest
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Override the adapter's configured readiness deadline
    pub ready_deadline: Option<Duration>,
}

impl DeployOptions {
    /// Override the readiness deadline
    pub fn with_ready_deadline(mut self, deadline: Duration) -> Self {
        self.ready_deadline = Some(deadline);
        self
    }
}

/// All provisioning backends must implement this trait.
/// The orchestrator works through this interface ONLY.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Backend identity
    fn backend(&self) -> BackendKind;

    /// Provision the manifest and return a handle to the ready resource.
    ///
    /// On failure mid-way, the adapter tears down everything it created
    /// before returning the error.
    async fn deploy(
        &self,
        req: &DeployRequest,
        opts: &DeployOptions,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle>;

    /// Power on a stopped resource
    async fn start(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Power off a running resource
    async fn stop(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Freeze execution, keeping the resource resident
    async fn pause(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Resume a paused resource
    async fn unpause(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Save state to disk and release the resource from its host
    async fn suspend(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Restore a suspended resource
    async fn resume(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Destroy the resource. Idempotent: unknown IDs succeed.
    async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()>;

    /// Change the resource's compute allocation
    async fn resize(
        &self,
        id: &ResourceId,
        resources: &ResourceRequest,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Capture a named point-in-time snapshot
    async fn snapshot(
        &self,
        id: &ResourceId,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Normalized lifecycle state as the backend reports it now
    async fn state(&self, id: &ResourceId) -> Result<ResourceState>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ServiceSpec;

    #[test]
    fn test_backend_kind_round_trips_as_text() {
        for kind in [BackendKind::OpenStack, BackendKind::VSphere, BackendKind::Ansible] {
            let parsed: BackendKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("ec2".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_selector_serde_shape() {
        let explicit = BackendSelector::Backend(BackendKind::VSphere);
        let json = serde_json::to_string(&explicit).unwrap();
        assert_eq!(json, r#"{"backend":"vsphere"}"#);

        let tagged: BackendSelector =
            serde_json::from_str(r#"{"provider_tag":"west-dc"}"#).unwrap();
        assert_eq!(tagged, BackendSelector::ProviderTag("west-dc".to_string()));
    }

    #[test]
    fn test_resource_name_combines_ids() {
        let req = DeployRequest::new(
            DeploymentId::new("dep-7"),
            LeaseId::new("lease-3"),
            Manifest::new("1.0").with_service(ServiceSpec::new(
                "web",
                "ubuntu-24.04",
                ResourceRequest::new(1000, 1024),
            )),
        );
        assert_eq!(req.resource_name(), "dep-7-lease-3");
    }
}
