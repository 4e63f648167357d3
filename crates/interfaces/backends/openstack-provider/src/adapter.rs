//! CloudAdapter implementation for OpenStack-style regions
//!
//! Deploy is a multi-step build: boot the server, poll it to Active,
//! then attach network ports and volumes. Any failure after the boot
//! call triggers compensating deletion of everything created so far,
//! in reverse order, before the original error is returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_core::{
    await_outcome, AdapterError, Backoff, BackendKind, CloudAdapter, DeployOptions, DeployRequest,
    Outcome, ResourceHandle, ResourceId, ResourceKind, ResourceRequest, ResourceState, Result,
};

use crate::ports::{BlockStoragePort, ComputePort, CreateServer, NetworkPort, ServerStatus};

/// Default deadline for a booted server to reach Active
pub const DEFAULT_READY_DEADLINE_SECS: u64 = 300;

fn default_ready_deadline() -> u64 {
    DEFAULT_READY_DEADLINE_SECS
}

fn default_poll_initial_ms() -> u64 {
    1_000
}

fn default_poll_max_secs() -> u64 {
    10
}

/// Startup configuration for one OpenStack-style region
#[derive(Debug, Clone, Deserialize)]
pub struct OpenStackConfig {
    /// Identity endpoint URL
    pub auth_url: String,

    /// Project (tenant) to provision into
    pub project: String,

    /// Provider identity tag used for backend selection
    pub provider_tag: String,

    /// Deadline for a new server to reach Active, in seconds
    #[serde(default = "default_ready_deadline")]
    pub ready_deadline_secs: u64,

    /// First status-poll delay, in milliseconds
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,

    /// Upper bound on the status-poll delay, in seconds
    #[serde(default = "default_poll_max_secs")]
    pub poll_max_secs: u64,
}

impl OpenStackConfig {
    /// Validate required fields. Called before any backend call.
    pub fn validate(&self) -> Result<()> {
        if self.auth_url.is_empty() {
            return Err(AdapterError::config("openstack: auth_url is required"));
        }
        if self.project.is_empty() {
            return Err(AdapterError::config("openstack: project is required"));
        }
        if self.provider_tag.is_empty() {
            return Err(AdapterError::config("openstack: provider_tag is required"));
        }
        Ok(())
    }

    fn ready_deadline(&self) -> Duration {
        Duration::from_secs(self.ready_deadline_secs)
    }

    fn poll_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.poll_initial_ms),
            Duration::from_secs(self.poll_max_secs),
        )
    }
}

/// Adapter for OpenStack-style regions
pub struct OpenStackAdapter {
    config: OpenStackConfig,
    compute: Arc<dyn ComputePort>,
    network: Arc<dyn NetworkPort>,
    storage: Arc<dyn BlockStoragePort>,
}

impl OpenStackAdapter {
    /// Create the adapter, validating configuration up front
    pub fn new(
        config: OpenStackConfig,
        compute: Arc<dyn ComputePort>,
        network: Arc<dyn NetworkPort>,
        storage: Arc<dyn BlockStoragePort>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            compute,
            network,
            storage,
        })
    }

    /// Provider identity tag from the region config
    pub fn provider_tag(&self) -> &str {
        &self.config.provider_tag
    }

    /// Poll the server until it reports Active
    async fn wait_until_active(
        &self,
        id: &ResourceId,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Waiting for server {} to be active (deadline: {:?})", id, deadline);

        await_outcome(
            || {
                let compute = self.compute.clone();
                let id = id.clone();
                async move {
                    match compute.server_status(&id).await? {
                        ServerStatus::Active => Ok(Outcome::Ready(())),
                        ServerStatus::Build => Ok(Outcome::Pending),
                        ServerStatus::Error => Ok(Outcome::Failed(AdapterError::backend(
                            format!("server {id} entered error status while building"),
                        ))),
                        other => Ok(Outcome::Failed(AdapterError::backend(format!(
                            "server {id} reached unexpected status {other:?} while building"
                        )))),
                    }
                }
            },
            self.config.poll_backoff(),
            deadline,
            cancel,
        )
        .await
    }

    /// Delete everything a failed deploy created, in reverse order.
    ///
    /// Returns the error to surface: the original failure when cleanup
    /// succeeded, an indeterminate error naming the leftovers when it
    /// did not.
    async fn unwind_deploy(
        &self,
        server: &ResourceId,
        ports: &[ResourceId],
        volumes: &[ResourceId],
        original: AdapterError,
    ) -> AdapterError {
        warn!("Deploy of server {} failed ({}), unwinding", server, original);

        let mut leaked: Vec<String> = Vec::new();

        for volume in volumes.iter().rev() {
            if let Err(e) = self.storage.delete_volume(volume).await {
                warn!("Failed to delete volume {} during unwind: {}", volume, e);
                leaked.push(format!("volume {volume}"));
            }
        }
        for port in ports.iter().rev() {
            if let Err(e) = self.network.delete_port(port).await {
                warn!("Failed to delete port {} during unwind: {}", port, e);
                leaked.push(format!("port {port}"));
            }
        }
        if let Err(e) = self.delete_server_idempotent(server).await {
            warn!("Failed to delete server {} during unwind: {}", server, e);
            leaked.push(format!("server {server}"));
        }

        if leaked.is_empty() {
            info!("Unwind complete for server {}", server);
            original
        } else {
            AdapterError::indeterminate(format!(
                "deploy failed ({original}) and unwind left {} behind",
                leaked.join(", ")
            ))
        }
    }

    async fn delete_server_idempotent(&self, id: &ResourceId) -> Result<()> {
        match self.compute.delete_server(id).await {
            Ok(()) => Ok(()),
            Err(AdapterError::NotFound(_)) => {
                debug!("Server {} already gone", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CloudAdapter for OpenStackAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::OpenStack
    }

    async fn deploy(
        &self,
        req: &DeployRequest,
        opts: &DeployOptions,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle> {
        let manifest = &req.manifest;
        let spec = CreateServer {
            name: req.resource_name(),
            image: manifest.primary_image()?.to_string(),
            resources: manifest.aggregate_resources(),
        };

        info!(
            "Deploying {} on openstack: image={}, cpu={}m, mem={}B",
            req.deployment_id, spec.image, spec.resources.cpu_millis, spec.resources.memory_bytes
        );

        // Nothing exists yet, so a create failure needs no unwind.
        let server_id = self.compute.create_server(&spec).await?;
        info!("Server created: {}", server_id);

        let deadline = opts.ready_deadline.unwrap_or_else(|| self.config.ready_deadline());
        if let Err(e) = self.wait_until_active(&server_id, deadline, cancel).await {
            return Err(self.unwind_deploy(&server_id, &[], &[], e).await);
        }

        let mut port_ids: Vec<ResourceId> = Vec::new();
        for network in &manifest.networks {
            if cancel.is_cancelled() {
                return Err(self
                    .unwind_deploy(&server_id, &port_ids, &[], AdapterError::Cancelled)
                    .await);
            }
            match self.network.create_port(&server_id, network).await {
                Ok(port_id) => {
                    debug!("Port {} attached on network {}", port_id, network.name);
                    port_ids.push(port_id);
                }
                Err(e) => {
                    return Err(self.unwind_deploy(&server_id, &port_ids, &[], e).await);
                }
            }
        }

        let mut volume_ids: Vec<ResourceId> = Vec::new();
        for volume in &manifest.volumes {
            if cancel.is_cancelled() {
                return Err(self
                    .unwind_deploy(&server_id, &port_ids, &volume_ids, AdapterError::Cancelled)
                    .await);
            }
            let created = match self.storage.create_volume(volume).await {
                Ok(id) => id,
                Err(e) => {
                    return Err(self.unwind_deploy(&server_id, &port_ids, &volume_ids, e).await);
                }
            };
            volume_ids.push(created.clone());
            if let Err(e) = self.storage.attach_volume(&server_id, &created).await {
                return Err(self.unwind_deploy(&server_id, &port_ids, &volume_ids, e).await);
            }
            debug!("Volume {} attached ({})", created, volume.name);
        }

        info!(
            "Deploy complete: server {} with {} ports, {} volumes",
            server_id,
            port_ids.len(),
            volume_ids.len()
        );

        Ok(ResourceHandle::active(
            server_id,
            ResourceKind::Server,
            BackendKind::OpenStack,
            req.deployment_id.clone(),
            req.lease_id.clone(),
            self.config.provider_tag.clone(),
        ))
    }

    async fn start(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        self.compute.start_server(id).await
    }

    async fn stop(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        self.compute.stop_server(id).await
    }

    async fn pause(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        self.compute.pause_server(id).await
    }

    async fn unpause(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        self.compute.unpause_server(id).await
    }

    async fn suspend(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        self.compute.suspend_server(id).await
    }

    async fn resume(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        self.compute.resume_server(id).await
    }

    async fn delete(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        info!("Deleting server {}", id);
        self.delete_server_idempotent(id).await
    }

    async fn resize(
        &self,
        id: &ResourceId,
        resources: &ResourceRequest,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        info!(
            "Resizing server {} to cpu={}m, mem={}B",
            id, resources.cpu_millis, resources.memory_bytes
        );
        self.compute.resize_server(id, resources).await
    }

    async fn snapshot(
        &self,
        id: &ResourceId,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Snapshotting server {} as {:?}", id, name);
        self.compute.snapshot_server(id, name).await
    }

    async fn state(&self, id: &ResourceId) -> Result<ResourceState> {
        match self.compute.server_status(id).await {
            Ok(ServerStatus::Active) => Ok(ResourceState::Active),
            Ok(ServerStatus::Shutoff) => Ok(ResourceState::Stopped),
            Ok(ServerStatus::Paused) => Ok(ResourceState::Paused),
            Ok(ServerStatus::Suspended) => Ok(ResourceState::Suspended),
            Ok(ServerStatus::Error) => Ok(ResourceState::Error),
            // Build is not a stable state; report it as transient so
            // callers poll again rather than mislabel the server.
            Ok(ServerStatus::Build) => Err(AdapterError::transient(format!(
                "server {id} still building"
            ))),
            Err(AdapterError::NotFound(_)) => Ok(ResourceState::Deleted),
            Err(e) => Err(e),
        }
    }
}
