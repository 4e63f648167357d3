//! Client ports for the region's compute, network, and storage endpoints
//!
//! The adapter never talks to a backend directly; it goes through these
//! traits. Production wiring binds them to real API clients, tests and
//! lab mode bind them to [`crate::lab::LabCloud`].

use async_trait::async_trait;

use gantry_core::{NetworkSpec, ResourceId, ResourceRequest, Result, VolumeSpec};

/// Request to boot one server
#[derive(Debug, Clone)]
pub struct CreateServer {
    /// Server name visible on the backend
    pub name: String,
    /// Image to boot from
    pub image: String,
    /// Flavor sizing
    pub resources: ResourceRequest,
}

/// Raw server status as the compute endpoint reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// Still being built, not usable yet
    Build,
    /// Running
    Active,
    /// Powered off
    Shutoff,
    /// Execution frozen in memory
    Paused,
    /// State written to disk, host released
    Suspended,
    /// The backend gave up on the server
    Error,
}

/// Compute endpoint operations
#[async_trait]
pub trait ComputePort: Send + Sync {
    /// Boot a server; returns its backend-assigned ID immediately,
    /// typically while the server is still in `Build`.
    async fn create_server(&self, spec: &CreateServer) -> Result<ResourceId>;

    /// Current raw status of a server
    async fn server_status(&self, id: &ResourceId) -> Result<ServerStatus>;

    /// Power on
    async fn start_server(&self, id: &ResourceId) -> Result<()>;

    /// Power off
    async fn stop_server(&self, id: &ResourceId) -> Result<()>;

    /// Freeze in memory
    async fn pause_server(&self, id: &ResourceId) -> Result<()>;

    /// Unfreeze
    async fn unpause_server(&self, id: &ResourceId) -> Result<()>;

    /// Write state to disk and release the host
    async fn suspend_server(&self, id: &ResourceId) -> Result<()>;

    /// Restore from suspension
    async fn resume_server(&self, id: &ResourceId) -> Result<()>;

    /// Change the server's flavor
    async fn resize_server(&self, id: &ResourceId, resources: &ResourceRequest) -> Result<()>;

    /// Capture a named image of the server
    async fn snapshot_server(&self, id: &ResourceId, name: &str) -> Result<()>;

    /// Destroy the server
    async fn delete_server(&self, id: &ResourceId) -> Result<()>;
}

/// Network endpoint operations
#[async_trait]
pub trait NetworkPort: Send + Sync {
    /// Create an attachment port on the named network and bind it to
    /// the server
    async fn create_port(&self, server: &ResourceId, network: &NetworkSpec) -> Result<ResourceId>;

    /// Destroy an attachment port
    async fn delete_port(&self, id: &ResourceId) -> Result<()>;
}

/// Block storage endpoint operations
#[async_trait]
pub trait BlockStoragePort: Send + Sync {
    /// Create a volume
    async fn create_volume(&self, volume: &VolumeSpec) -> Result<ResourceId>;

    /// Attach a volume to a server
    async fn attach_volume(&self, server: &ResourceId, volume: &ResourceId) -> Result<()>;

    /// Destroy a volume, detaching it first if needed
    async fn delete_volume(&self, id: &ResourceId) -> Result<()>;
}
