//! CloudAdapter implementation for vSphere-style backends
//!
//! Every mutating call is submit-task-then-poll. Deploy chains three
//! tasks (clone, reconfigure, power on); a failure after the clone
//! destroys the partly-built VM before the error is returned, and a
//! clone that never finishes is handed to the backend's task
//! cancellation so it cannot materialize an orphan later.

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

use crate::task::{classify_task_error, TaskId, TaskState};
use crate::vim::{CloneSpec, PowerState, VimPort};

/// Default deadline for a single backend task, in seconds
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 120;

fn default_task_timeout() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn default_guest_shutdown_secs() -> u64 {
    90
}

fn default_poll_initial_ms() -> u64 {
    500
}

fn default_poll_max_secs() -> u64 {
    5
}

/// Startup configuration for one vSphere-style backend
///
/// The four placement inputs (datacenter, cluster, datastore, network)
/// are all required; a deploy cannot even be attempted without them.
#[derive(Debug, Clone, Deserialize)]
pub struct VSphereConfig {
    /// Management API endpoint URL
    pub endpoint: String,

    /// Target datacenter for clones
    pub datacenter: String,

    /// Target cluster for clones
    pub cluster: String,

    /// Target datastore for clones
    pub datastore: String,

    /// Network to attach new VMs to
    pub network: String,

    /// Provider identity tag used for backend selection
    pub provider_tag: String,

    /// Deadline for one task to complete, in seconds
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// How long to wait for a clean guest shutdown before falling back
    /// to a hard power-off, in seconds
    #[serde(default = "default_guest_shutdown_secs")]
    pub guest_shutdown_secs: u64,

    /// First task-poll delay, in milliseconds
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,

    /// Upper bound on the task-poll delay, in seconds
    #[serde(default = "default_poll_max_secs")]
    pub poll_max_secs: u64,
}

impl VSphereConfig {
    /// Validate required fields. Called before any backend call.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("endpoint", &self.endpoint),
            ("datacenter", &self.datacenter),
            ("cluster", &self.cluster),
            ("datastore", &self.datastore),
            ("network", &self.network),
            ("provider_tag", &self.provider_tag),
        ] {
            if value.is_empty() {
                return Err(AdapterError::config(format!("vsphere: {field} is required")));
            }
        }
        Ok(())
    }

    fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    fn guest_shutdown_deadline(&self) -> Duration {
        Duration::from_secs(self.guest_shutdown_secs)
    }

    fn poll_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.poll_initial_ms),
            Duration::from_secs(self.poll_max_secs),
        )
    }
}

/// Adapter for vSphere-style backends
pub struct VSphereAdapter {
    config: VSphereConfig,
    vim: Arc<dyn VimPort>,
}

impl VSphereAdapter {
    /// Create the adapter, validating configuration up front
    pub fn new(config: VSphereConfig, vim: Arc<dyn VimPort>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, vim })
    }

    /// Provider identity tag from the backend config
    pub fn provider_tag(&self) -> &str {
        &self.config.provider_tag
    }

    /// Poll a task until Success, returning the entity it produced.
    ///
    /// Queued and Running are pending; Error is classified into the
    /// shared taxonomy; a task that outlives `timeout` yields
    /// StillPending.
    async fn wait_for_task(
        &self,
        task: &TaskId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ResourceId>> {
        debug!("Waiting for task {} (timeout: {:?})", task, timeout);

        await_outcome(
            || {
                let vim = self.vim.clone();
                let task = task.clone();
                async move {
                    let status = vim.task_status(&task).await?;
                    match status.state {
                        TaskState::Success => Ok(Outcome::Ready(status.entity)),
                        TaskState::Queued | TaskState::Running => Ok(Outcome::Pending),
                        TaskState::Error => {
                            let message = status.message.unwrap_or_else(|| "unknown".to_string());
                            Ok(Outcome::Failed(classify_task_error(&task, &message)))
                        }
                    }
                }
            },
            self.config.poll_backoff(),
            timeout,
            cancel,
        )
        .await
    }

    /// Ask the backend to abandon a task we are no longer waiting on
    async fn abandon_task(&self, task: &TaskId) {
        if let Err(e) = self.vim.cancel_task(task).await {
            warn!("Failed to cancel task {}: {}", task, e);
        }
    }

    /// Destroy a partly-built VM after a failed deploy step.
    ///
    /// Runs under a fresh token so cleanup still happens when the
    /// deploy itself was cancelled. Returns the error to surface.
    async fn unwind_clone(&self, vm: &ResourceId, original: AdapterError) -> AdapterError {
        warn!("Deploy of VM {} failed ({}), destroying clone", vm, original);

        let cleanup = CancellationToken::new();
        let destroyed = match self.vim.destroy_vm(vm).await {
            Ok(task) => self
                .wait_for_task(&task, self.config.task_timeout(), &cleanup)
                .await
                .map(|_| ()),
            Err(AdapterError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        };

        match destroyed {
            Ok(()) => {
                info!("Clone {} destroyed after failed deploy", vm);
                original
            }
            Err(e) => {
                warn!("Failed to destroy clone {}: {}", vm, e);
                AdapterError::indeterminate(format!(
                    "deploy failed ({original}) and clone {vm} could not be destroyed: {e}"
                ))
            }
        }
    }

    /// Submit-and-wait for a task that returns no entity
    async fn run_task(
        &self,
        task: Result<TaskId>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let task = task?;
        self.wait_for_task(&task, self.config.task_timeout(), cancel)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CloudAdapter for VSphereAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::VSphere
    }

    async fn deploy(
        &self,
        req: &DeployRequest,
        opts: &DeployOptions,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle> {
        let manifest = &req.manifest;
        let spec = CloneSpec {
            name: req.resource_name(),
            template: manifest.primary_image()?.to_string(),
            datacenter: self.config.datacenter.clone(),
            cluster: self.config.cluster.clone(),
            datastore: self.config.datastore.clone(),
            network: self.config.network.clone(),
            resources: manifest.aggregate_resources(),
        };
        let task_timeout = opts.ready_deadline.unwrap_or_else(|| self.config.task_timeout());

        info!(
            "Deploying {} on vsphere: template={}, dc={}, cluster={}",
            req.deployment_id, spec.template, spec.datacenter, spec.cluster
        );

        let clone_task = self.vim.clone_from_template(&spec).await?;
        let vm = match self.wait_for_task(&clone_task, task_timeout, cancel).await {
            Ok(Some(vm)) => vm,
            Ok(None) => {
                return Err(AdapterError::backend(format!(
                    "clone task {clone_task} succeeded without naming a VM"
                )));
            }
            // The clone may still land later; cancel it so it cannot
            // leave an untracked VM behind.
            Err(e @ (AdapterError::Cancelled | AdapterError::StillPending(_))) => {
                self.abandon_task(&clone_task).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        info!("Clone complete: {}", vm);

        let reconfigure = self.vim.reconfigure_vm(&vm, &spec.resources).await;
        if let Err(e) = self.run_task(reconfigure, cancel).await {
            return Err(self.unwind_clone(&vm, e).await);
        }
        debug!("VM {} reconfigured to cpu={}m", vm, spec.resources.cpu_millis);

        let power_on = self.vim.power_on(&vm).await;
        if let Err(e) = self.run_task(power_on, cancel).await {
            return Err(self.unwind_clone(&vm, e).await);
        }

        info!("Deploy complete: VM {} powered on", vm);

        Ok(ResourceHandle::active(
            vm,
            ResourceKind::Server,
            BackendKind::VSphere,
            req.deployment_id.clone(),
            req.lease_id.clone(),
            self.config.provider_tag.clone(),
        ))
    }

    async fn start(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        let task = self.vim.power_on(id).await;
        self.run_task(task, cancel).await
    }

    async fn stop(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        // Prefer a clean guest shutdown; it needs running tools.
        match self.vim.guest_tools_running(id).await {
            Ok(true) => {
                info!("Stopping VM {} via guest shutdown", id);
                self.vim.shutdown_guest(id).await?;
                let wait = await_outcome(
                    || {
                        let vim = self.vim.clone();
                        let id = id.clone();
                        async move {
                            match vim.vm_power_state(&id).await? {
                                PowerState::PoweredOff => Ok(Outcome::Ready(())),
                                _ => Ok(Outcome::Pending),
                            }
                        }
                    },
                    self.config.poll_backoff(),
                    self.config.guest_shutdown_deadline(),
                    cancel,
                )
                .await;
                match wait {
                    Ok(()) => Ok(()),
                    Err(AdapterError::StillPending(_)) => {
                        warn!("Guest shutdown of {} timed out, forcing power off", id);
                        let task = self.vim.power_off(id).await;
                        self.run_task(task, cancel).await
                    }
                    Err(e) => Err(e),
                }
            }
            Ok(false) => {
                info!("Stopping VM {} via hard power-off (no guest tools)", id);
                let task = self.vim.power_off(id).await;
                self.run_task(task, cancel).await
            }
            Err(e) => Err(e),
        }
    }

    async fn pause(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        Err(AdapterError::unsupported(format!(
            "vsphere cannot pause VM {id}; use suspend"
        )))
    }

    async fn unpause(&self, id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        Err(AdapterError::unsupported(format!(
            "vsphere cannot unpause VM {id}; use resume"
        )))
    }

    async fn suspend(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        let task = self.vim.suspend_vm(id).await;
        self.run_task(task, cancel).await
    }

    async fn resume(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        // Resuming a suspended VM is a power-on in this API.
        let task = self.vim.power_on(id).await;
        self.run_task(task, cancel).await
    }

    async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        info!("Deleting VM {}", id);

        // Destroy requires the VM off; try a hard power-off first and
        // tolerate failures, destroy is what decides.
        match self.vim.vm_power_state(id).await {
            Ok(PowerState::PoweredOn) => {
                if let Ok(task) = self.vim.power_off(id).await {
                    if let Err(e) = self
                        .wait_for_task(&task, self.config.task_timeout(), cancel)
                        .await
                    {
                        warn!("Power-off before destroy of {} failed: {}", id, e);
                    }
                }
            }
            Ok(_) => {}
            Err(AdapterError::NotFound(_)) => {
                debug!("VM {} already gone", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match self.vim.destroy_vm(id).await {
            Ok(task) => self
                .wait_for_task(&task, self.config.task_timeout(), cancel)
                .await
                .map(|_| ()),
            Err(AdapterError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn resize(
        &self,
        id: &ResourceId,
        resources: &ResourceRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Resizing VM {} to cpu={}m", id, resources.cpu_millis);
        let task = self.vim.reconfigure_vm(id, resources).await;
        self.run_task(task, cancel).await
    }

    async fn snapshot(
        &self,
        id: &ResourceId,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Snapshotting VM {} as {:?}", id, name);
        let task = self.vim.create_snapshot(id, name).await;
        self.run_task(task, cancel).await
    }

    async fn state(&self, id: &ResourceId) -> Result<ResourceState> {
        match self.vim.vm_power_state(id).await {
            Ok(PowerState::PoweredOn) => Ok(ResourceState::Active),
            Ok(PowerState::PoweredOff) => Ok(ResourceState::Stopped),
            Ok(PowerState::Suspended) => Ok(ResourceState::Suspended),
            Err(AdapterError::NotFound(_)) => Ok(ResourceState::Deleted),
            Err(e) => Err(e),
        }
    }
}
