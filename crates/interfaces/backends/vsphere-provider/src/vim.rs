//! Client port for the backend's management API
//!
//! Mutating calls hand back a [`TaskId`]; reads answer directly. Guest
//! calls act inside the VM through guest tools and are plain calls,
//! not tasks.

use async_trait::async_trait;

use gantry_core::{ResourceId, ResourceRequest, Result};

use crate::task::{TaskId, TaskStatus};

/// Where and from what to clone a new VM
#[derive(Debug, Clone)]
pub struct CloneSpec {
    /// Name for the new VM
    pub name: String,
    /// Template to clone from
    pub template: String,
    /// Target datacenter
    pub datacenter: String,
    /// Target cluster
    pub cluster: String,
    /// Target datastore
    pub datastore: String,
    /// Network to attach
    pub network: String,
    /// Compute sizing applied after the clone
    pub resources: ResourceRequest,
}

/// Raw power state of a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Running
    PoweredOn,
    /// Off
    PoweredOff,
    /// State saved to disk
    Suspended,
}

/// Management API operations
#[async_trait]
pub trait VimPort: Send + Sync {
    /// Clone a VM from a template. The produced VM's ID arrives in the
    /// task's Success status.
    async fn clone_from_template(&self, spec: &CloneSpec) -> Result<TaskId>;

    /// Change a VM's CPU and memory allocation
    async fn reconfigure_vm(&self, vm: &ResourceId, resources: &ResourceRequest) -> Result<TaskId>;

    /// Power a VM on
    async fn power_on(&self, vm: &ResourceId) -> Result<TaskId>;

    /// Hard power-off, regardless of guest state
    async fn power_off(&self, vm: &ResourceId) -> Result<TaskId>;

    /// Save VM state to disk and release its host
    async fn suspend_vm(&self, vm: &ResourceId) -> Result<TaskId>;

    /// Capture a named snapshot
    async fn create_snapshot(&self, vm: &ResourceId, name: &str) -> Result<TaskId>;

    /// Destroy a VM and its storage
    async fn destroy_vm(&self, vm: &ResourceId) -> Result<TaskId>;

    /// Current status of a task
    async fn task_status(&self, task: &TaskId) -> Result<TaskStatus>;

    /// Ask the backend to abandon an in-flight task
    async fn cancel_task(&self, task: &TaskId) -> Result<()>;

    /// Current power state of a VM
    async fn vm_power_state(&self, vm: &ResourceId) -> Result<PowerState>;

    /// Whether guest tools are running inside the VM
    async fn guest_tools_running(&self, vm: &ResourceId) -> Result<bool>;

    /// Ask the guest OS to shut down cleanly. Requires guest tools;
    /// completion shows up as a later PoweredOff power state.
    async fn shutdown_guest(&self, vm: &ResourceId) -> Result<()>;
}
