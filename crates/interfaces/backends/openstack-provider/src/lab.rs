//! In-memory stand-in for an OpenStack-style region
//!
//! Implements all three port traits over a single mutex-guarded state
//! table. Servers pass through `Build` for a configurable number of
//! status polls before reaching `Active`, and failures can be injected
//! per call site, so tests can drive every deploy and unwind path
//! without a real region.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use gantry_core::{AdapterError, NetworkSpec, ResourceId, ResourceRequest, Result, VolumeSpec};

use crate::ports::{BlockStoragePort, ComputePort, CreateServer, NetworkPort, ServerStatus};

#[derive(Debug)]
struct LabServer {
    status: ServerStatus,
    build_remaining: u32,
    resources: ResourceRequest,
}

#[derive(Debug)]
struct LabPort {
    server: ResourceId,
}

#[derive(Debug)]
struct LabVolume {
    attached_to: Option<ResourceId>,
}

#[derive(Debug, Default)]
struct LabState {
    servers: HashMap<ResourceId, LabServer>,
    ports: HashMap<ResourceId, LabPort>,
    volumes: HashMap<ResourceId, LabVolume>,
    snapshots: Vec<(ResourceId, String)>,
    next_id: u64,

    // Behavior knobs
    build_polls: u32,
    capacity: Option<usize>,
    fail_port_create: bool,
    fail_volume_create: bool,
    status_failures: u32,
    indeterminate_stop: bool,
}

/// In-memory region implementing the compute, network, and storage ports
#[derive(Debug, Default)]
pub struct LabCloud {
    state: Mutex<LabState>,
}

impl LabCloud {
    /// Empty region where servers become Active on the first poll
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of status polls a new server spends in Build
    pub fn with_build_polls(mut self, polls: u32) -> Self {
        self.state.get_mut().build_polls = polls;
        self
    }

    /// Cap the number of servers; creates beyond it fail with quota
    pub fn with_capacity(mut self, servers: usize) -> Self {
        self.state.get_mut().capacity = Some(servers);
        self
    }

    /// Make the next port creation fail
    pub async fn fail_next_port_create(&self) {
        self.state.lock().await.fail_port_create = true;
    }

    /// Make the next volume creation fail
    pub async fn fail_next_volume_create(&self) {
        self.state.lock().await.fail_volume_create = true;
    }

    /// Make the next `n` status polls fail transiently
    pub async fn inject_status_failures(&self, n: u32) {
        self.state.lock().await.status_failures = n;
    }

    /// Make the next stop apply but report an indeterminate outcome
    pub async fn inject_indeterminate_stop(&self) {
        self.state.lock().await.indeterminate_stop = true;
    }

    /// Number of servers currently in the region
    pub async fn server_count(&self) -> usize {
        self.state.lock().await.servers.len()
    }

    /// Number of attachment ports currently in the region
    pub async fn port_count(&self) -> usize {
        self.state.lock().await.ports.len()
    }

    /// Number of volumes currently in the region
    pub async fn volume_count(&self) -> usize {
        self.state.lock().await.volumes.len()
    }

    /// Snapshots taken, in order
    pub async fn snapshots(&self) -> Vec<(ResourceId, String)> {
        self.state.lock().await.snapshots.clone()
    }

    /// Resources currently allocated to a server
    pub async fn server_resources(&self, id: &ResourceId) -> Option<ResourceRequest> {
        self.state
            .lock()
            .await
            .servers
            .get(id)
            .map(|s| s.resources.clone())
    }
}

fn fresh_id(state: &mut LabState, prefix: &str) -> ResourceId {
    state.next_id += 1;
    ResourceId::new(format!("{}-{}", prefix, state.next_id))
}

fn server_mut<'a>(state: &'a mut LabState, id: &ResourceId) -> Result<&'a mut LabServer> {
    state
        .servers
        .get_mut(id)
        .ok_or_else(|| AdapterError::not_found(format!("server {id}")))
}

#[async_trait]
impl ComputePort for LabCloud {
    async fn create_server(&self, spec: &CreateServer) -> Result<ResourceId> {
        let mut state = self.state.lock().await;

        if let Some(cap) = state.capacity {
            if state.servers.len() >= cap {
                return Err(AdapterError::quota(format!(
                    "region at capacity ({cap} servers)"
                )));
            }
        }

        let id = fresh_id(&mut state, "srv");
        let status = if state.build_polls == 0 {
            ServerStatus::Active
        } else {
            ServerStatus::Build
        };
        let build_remaining = state.build_polls;
        state.servers.insert(
            id.clone(),
            LabServer {
                status,
                build_remaining,
                resources: spec.resources.clone(),
            },
        );
        Ok(id)
    }

    async fn server_status(&self, id: &ResourceId) -> Result<ServerStatus> {
        let mut state = self.state.lock().await;

        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(AdapterError::transient("status endpoint unavailable"));
        }

        let server = server_mut(&mut state, id)?;
        if server.status == ServerStatus::Build {
            if server.build_remaining > 0 {
                server.build_remaining -= 1;
            } else {
                server.status = ServerStatus::Active;
            }
        }
        Ok(server.status)
    }

    async fn start_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.status = ServerStatus::Active;
        Ok(())
    }

    async fn stop_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.status = ServerStatus::Shutoff;
        if state.indeterminate_stop {
            // The stop landed, but the caller never hears about it.
            state.indeterminate_stop = false;
            return Err(AdapterError::indeterminate(
                "connection dropped while stopping; outcome unknown",
            ));
        }
        Ok(())
    }

    async fn pause_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.status = ServerStatus::Paused;
        Ok(())
    }

    async fn unpause_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.status = ServerStatus::Active;
        Ok(())
    }

    async fn suspend_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.status = ServerStatus::Suspended;
        Ok(())
    }

    async fn resume_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.status = ServerStatus::Active;
        Ok(())
    }

    async fn resize_server(&self, id: &ResourceId, resources: &ResourceRequest) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?.resources = resources.clone();
        Ok(())
    }

    async fn snapshot_server(&self, id: &ResourceId, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        server_mut(&mut state, id)?;
        state.snapshots.push((id.clone(), name.to_string()));
        Ok(())
    }

    async fn delete_server(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.servers.remove(id).is_none() {
            return Err(AdapterError::not_found(format!("server {id}")));
        }
        // Attachment ports die with their server; volumes detach.
        state.ports.retain(|_, p| p.server != *id);
        for volume in state.volumes.values_mut() {
            if volume.attached_to.as_ref() == Some(id) {
                volume.attached_to = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkPort for LabCloud {
    async fn create_port(&self, server: &ResourceId, network: &NetworkSpec) -> Result<ResourceId> {
        let mut state = self.state.lock().await;
        if state.fail_port_create {
            state.fail_port_create = false;
            return Err(AdapterError::backend(format!(
                "port allocation failed on network {}",
                network.name
            )));
        }
        if !state.servers.contains_key(server) {
            return Err(AdapterError::not_found(format!("server {server}")));
        }
        let id = fresh_id(&mut state, "port");
        state.ports.insert(
            id.clone(),
            LabPort {
                server: server.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_port(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.ports.remove(id).is_none() {
            return Err(AdapterError::not_found(format!("port {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStoragePort for LabCloud {
    async fn create_volume(&self, volume: &VolumeSpec) -> Result<ResourceId> {
        let mut state = self.state.lock().await;
        if state.fail_volume_create {
            state.fail_volume_create = false;
            return Err(AdapterError::backend(format!(
                "volume allocation failed for {}",
                volume.name
            )));
        }
        let id = fresh_id(&mut state, "vol");
        state.volumes.insert(id.clone(), LabVolume { attached_to: None });
        Ok(id)
    }

    async fn attach_volume(&self, server: &ResourceId, volume: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.servers.contains_key(server) {
            return Err(AdapterError::not_found(format!("server {server}")));
        }
        let vol = state
            .volumes
            .get_mut(volume)
            .ok_or_else(|| AdapterError::not_found(format!("volume {volume}")))?;
        vol.attached_to = Some(server.clone());
        Ok(())
    }

    async fn delete_volume(&self, id: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.volumes.remove(id).is_none() {
            return Err(AdapterError::not_found(format!("volume {id}")));
        }
        Ok(())
    }
}
