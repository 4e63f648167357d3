//! CloudAdapter implementation for playbook-driven backends
//!
//! There is no machine API behind this adapter. The operator's hosts
//! already exist; a "resource" here is the host set after the provision
//! playbook has configured it, and delete is the teardown playbook.
//! Lifecycle verbs beyond that exist only when the operator wired a
//! playbook for them, everything else reports Unsupported.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gantry_core::{
    AdapterError, BackendKind, CloudAdapter, DeployOptions, DeployRequest, ResourceHandle,
    ResourceId, ResourceKind, ResourceRequest, ResourceState, Result,
};

use crate::inventory::Inventory;
use crate::runner::{ExecutionId, ExecutionResult, PlaybookRunner};

/// Runner binary used when the config names none
pub const DEFAULT_RUNNER: &str = "ansible-playbook";

/// Default deadline for one playbook run, in seconds
pub const DEFAULT_PLAY_TIMEOUT_SECS: u64 = 1800;

fn default_runner() -> PathBuf {
    PathBuf::from(DEFAULT_RUNNER)
}

fn default_play_timeout() -> u64 {
    DEFAULT_PLAY_TIMEOUT_SECS
}

/// One target host in the operator's inventory
#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    /// Inventory name
    pub name: String,
    /// Address the runner connects to
    pub address: String,
}

/// Playbooks wired to lifecycle operations
///
/// Provision and teardown are mandatory; a backend that cannot tear
/// down what it built has no business deploying. Start and stop are
/// optional and gate whether those verbs are supported at all.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybookSet {
    /// Configures the host set into a ready deployment
    pub provision: String,
    /// Returns the host set to its unconfigured state
    pub teardown: String,
    /// Brings a stopped deployment back up
    #[serde(default)]
    pub start: Option<String>,
    /// Stops the deployment's services without tearing down
    #[serde(default)]
    pub stop: Option<String>,
}

/// Startup configuration for one playbook-driven backend
#[derive(Debug, Clone, Deserialize)]
pub struct AnsibleConfig {
    /// Directory the playbooks live in
    pub playbook_dir: PathBuf,

    /// Runner binary
    #[serde(default = "default_runner")]
    pub runner: PathBuf,

    /// Provider identity tag used for backend selection
    pub provider_tag: String,

    /// Hosts every playbook runs against
    pub hosts: Vec<HostEntry>,

    /// Lifecycle playbook wiring
    pub playbooks: PlaybookSet,

    /// Deadline for one playbook run, in seconds
    #[serde(default = "default_play_timeout")]
    pub play_timeout_secs: u64,
}

impl AnsibleConfig {
    /// Validate required fields. Called before any playbook runs.
    pub fn validate(&self) -> Result<()> {
        if self.provider_tag.is_empty() {
            return Err(AdapterError::config("ansible: provider_tag is required"));
        }
        if self.hosts.is_empty() {
            return Err(AdapterError::config("ansible: at least one host is required"));
        }
        let mut seen = std::collections::HashSet::new();
        for host in &self.hosts {
            if host.name.is_empty() || host.address.is_empty() {
                return Err(AdapterError::config(
                    "ansible: every host needs a name and an address",
                ));
            }
            if !seen.insert(host.name.as_str()) {
                return Err(AdapterError::config(format!(
                    "ansible: duplicate host name {:?}",
                    host.name
                )));
            }
        }
        if self.playbooks.provision.is_empty() || self.playbooks.teardown.is_empty() {
            return Err(AdapterError::config(
                "ansible: provision and teardown playbooks are required",
            ));
        }
        if self.play_timeout_secs == 0 {
            return Err(AdapterError::config("ansible: play_timeout_secs must be positive"));
        }
        Ok(())
    }

    fn play_timeout(&self) -> Duration {
        Duration::from_secs(self.play_timeout_secs)
    }
}

/// What the adapter remembers about one deployed host set
#[derive(Debug, Clone)]
struct HostSetRecord {
    state: ResourceState,
    last_execution: ExecutionId,
}

/// Adapter for playbook-driven backends
pub struct AnsibleAdapter {
    config: AnsibleConfig,
    runner: PlaybookRunner,
    records: Mutex<HashMap<ResourceId, HostSetRecord>>,
}

impl AnsibleAdapter {
    /// Create the adapter, validating configuration up front
    pub fn new(config: AnsibleConfig) -> Result<Self> {
        config.validate()?;
        let runner = PlaybookRunner::new(config.runner.clone(), config.playbook_dir.clone());
        Ok(Self {
            config,
            runner,
            records: Mutex::new(HashMap::new()),
        })
    }

    /// Provider identity tag from the backend config
    pub fn provider_tag(&self) -> &str {
        &self.config.provider_tag
    }

    fn inventory(&self) -> Inventory {
        self.config
            .hosts
            .iter()
            .fold(Inventory::new(), |inv, host| inv.with_host(&host.name, &host.address))
    }

    async fn run_playbook(
        &self,
        playbook: &str,
        vars: &[(String, String)],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        self.runner
            .run(playbook, &self.inventory(), vars, timeout, cancel)
            .await
    }

    /// Run an optional lifecycle playbook and move the record to
    /// `on_success` when the play comes through clean.
    async fn lifecycle(
        &self,
        id: &ResourceId,
        playbook: Option<&str>,
        verb: &str,
        on_success: ResourceState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        {
            let records = self.records.lock().await;
            if !records.contains_key(id) {
                return Err(AdapterError::not_found(format!("host set {id} is unknown")));
            }
        }
        let playbook = playbook.ok_or_else(|| {
            AdapterError::unsupported(format!("ansible: {verb} requires a {verb} playbook"))
        })?;

        let vars = vec![("gantry_resource".to_string(), id.to_string())];
        let result = self
            .run_playbook(playbook, &vars, self.config.play_timeout(), cancel)
            .await?;
        if result.failed() {
            return Err(AdapterError::backend(format!(
                "{verb} playbook failed: {}",
                result.summary()
            )));
        }

        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            record.state = on_success;
            record.last_execution = result.id;
        }
        info!("Host set {} {}: now {}", id, verb, on_success);
        Ok(())
    }
}

fn deploy_vars(req: &DeployRequest) -> Result<Vec<(String, String)>> {
    let resources = req.manifest.aggregate_resources();
    Ok(vec![
        ("gantry_deployment".to_string(), req.deployment_id.to_string()),
        ("gantry_lease".to_string(), req.lease_id.to_string()),
        ("gantry_image".to_string(), req.manifest.primary_image()?.to_string()),
        ("gantry_cpu_millis".to_string(), resources.cpu_millis.to_string()),
        ("gantry_memory_bytes".to_string(), resources.memory_bytes.to_string()),
    ])
}

#[async_trait]
impl CloudAdapter for AnsibleAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Ansible
    }

    async fn deploy(
        &self,
        req: &DeployRequest,
        opts: &DeployOptions,
        cancel: &CancellationToken,
    ) -> Result<ResourceHandle> {
        let timeout = opts.ready_deadline.unwrap_or_else(|| self.config.play_timeout());
        let vars = deploy_vars(req)?;

        info!(
            "Deploying {} onto {} hosts via {}",
            req.deployment_id,
            self.config.hosts.len(),
            self.config.playbooks.provision
        );
        let result = self
            .run_playbook(&self.config.playbooks.provision, &vars, timeout, cancel)
            .await?;
        if result.failed() {
            return Err(AdapterError::backend(format!(
                "provision playbook failed: {}",
                result.summary()
            )));
        }

        let id = ResourceId::new(format!("hostset-{}", result.id));
        let handle = ResourceHandle::active(
            id.clone(),
            ResourceKind::HostSet,
            BackendKind::Ansible,
            req.deployment_id.clone(),
            req.lease_id.clone(),
            self.config.provider_tag.clone(),
        );
        self.records.lock().await.insert(
            id.clone(),
            HostSetRecord {
                state: ResourceState::Active,
                last_execution: result.id,
            },
        );
        info!("Host set {} provisioned for {}", id, req.deployment_id);
        Ok(handle)
    }

    async fn start(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        let playbook = self.config.playbooks.start.clone();
        self.lifecycle(id, playbook.as_deref(), "start", ResourceState::Active, cancel)
            .await
    }

    async fn stop(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        let playbook = self.config.playbooks.stop.clone();
        self.lifecycle(id, playbook.as_deref(), "stop", ResourceState::Stopped, cancel)
            .await
    }

    async fn pause(&self, _id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        Err(AdapterError::unsupported("ansible: pause is not supported"))
    }

    async fn unpause(&self, _id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        Err(AdapterError::unsupported("ansible: unpause is not supported"))
    }

    async fn suspend(&self, _id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        Err(AdapterError::unsupported("ansible: suspend is not supported"))
    }

    async fn resume(&self, _id: &ResourceId, _cancel: &CancellationToken) -> Result<()> {
        Err(AdapterError::unsupported("ansible: resume is not supported"))
    }

    async fn delete(&self, id: &ResourceId, cancel: &CancellationToken) -> Result<()> {
        {
            let records = self.records.lock().await;
            match records.get(id) {
                None => {
                    debug!("Host set {} is unknown, nothing to tear down", id);
                    return Ok(());
                }
                Some(record) if record.state == ResourceState::Deleted => {
                    debug!("Host set {} already torn down", id);
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        let vars = vec![("gantry_resource".to_string(), id.to_string())];
        let result = self
            .run_playbook(
                &self.config.playbooks.teardown,
                &vars,
                self.config.play_timeout(),
                cancel,
            )
            .await?;
        if result.failed() {
            // State is left untouched so the delete can be retried.
            return Err(AdapterError::backend(format!(
                "teardown playbook failed: {}",
                result.summary()
            )));
        }

        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            record.state = ResourceState::Deleted;
            record.last_execution = result.id;
        }
        info!("Host set {} torn down", id);
        Ok(())
    }

    async fn resize(
        &self,
        _id: &ResourceId,
        _resources: &ResourceRequest,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Err(AdapterError::unsupported("ansible: resize is not supported"))
    }

    async fn snapshot(
        &self,
        _id: &ResourceId,
        _name: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Err(AdapterError::unsupported("ansible: snapshot is not supported"))
    }

    async fn state(&self, id: &ResourceId) -> Result<ResourceState> {
        let records = self.records.lock().await;
        match records.get(id) {
            Some(record) => Ok(record.state),
            None => Err(AdapterError::not_found(format!("host set {id} is unknown"))),
        }
    }
}
