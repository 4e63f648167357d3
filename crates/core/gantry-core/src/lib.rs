//! # Gantry Core
//!
//! Shared types and the backend capability contract for the Gantry
//! provisioning stack.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator                      Backends
//! ├── Manifest intake      ────►  CloudAdapter trait
//! ├── Backend selection           ├── openstack-provider
//! ├── Handle registry             ├── vsphere-provider
//! └── Retry / reconcile           └── ansible-provider
//! ```
//!
//! Everything above the adapters works through [`CloudAdapter`] ONLY,
//! never concrete backend types. The three backends expose very
//! different native surfaces:
//!
//! - OpenStack-style: synchronous create, then poll until ready
//! - vSphere-style: every mutating call returns a task handle to poll
//! - Ansible-style: run an external playbook process and parse its recap
//!
//! [`Outcome`] and [`await_outcome`] fold all three into one
//! poll-until-terminal shape, so retry, deadline, and cancellation
//! behavior is written once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod error;
pub mod handle;
pub mod manifest;
pub mod outcome;

// Capability contract
pub use adapter::{BackendKind, BackendSelector, CloudAdapter, DeployOptions, DeployRequest};

// Resource identity and lifecycle
pub use handle::{
    DeploymentId, LeaseId, ResourceHandle, ResourceId, ResourceKind, ResourceState,
};

// Deployment manifests
pub use manifest::{
    Manifest, NetworkKind, NetworkSpec, ResourceRequest, ServiceSpec, VolumeKind, VolumeSpec,
    SUPPORTED_MAJOR_VERSION,
};

// Error handling
pub use error::{AdapterError, Result};

// Operation outcomes and polling
pub use outcome::{await_outcome, retry_transient, Backoff, Outcome};
