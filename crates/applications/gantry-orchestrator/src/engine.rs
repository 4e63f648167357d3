//! Deployment engine
//!
//! Ties the pieces together: resolves each provisioning request to
//! exactly one adapter, owns the retry policy for transient failures,
//! serializes same-resource operations through the registry's per-entry
//! locks, and emits usage when a resource's lifecycle ends. Adapters
//! classify failures; the policy applied to each class lives here.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_core::{
    retry_transient, AdapterError, Backoff, BackendKind, BackendSelector, CloudAdapter,
    DeployOptions, DeployRequest, DeploymentId, LeaseId, Manifest, ResourceId, ResourceRequest,
    ResourceState,
};

use crate::config::EngineConfig;
use crate::error::{OrchestratorError, Result};
use crate::registry::{HandleRecord, HandleRegistry, ResourceStatus};
use crate::usage::UsageEmitter;

/// The configured backends, addressable by kind or by provider tag
#[derive(Default)]
pub struct AdapterSet {
    by_kind: HashMap<BackendKind, Arc<dyn CloudAdapter>>,
    by_tag: HashMap<String, BackendKind>,
}

impl AdapterSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one adapter under its provider tag
    pub fn register(&mut self, provider_tag: impl Into<String>, adapter: Arc<dyn CloudAdapter>) {
        let kind = adapter.backend();
        self.by_tag.insert(provider_tag.into(), kind);
        self.by_kind.insert(kind, adapter);
    }

    /// Adapter for a backend kind
    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn CloudAdapter>> {
        self.by_kind.get(&kind).cloned()
    }

    /// Resolve a selector to its adapter. Evaluated once per deployment.
    pub fn resolve(&self, selector: &BackendSelector) -> Result<Arc<dyn CloudAdapter>> {
        match selector {
            BackendSelector::Backend(kind) => self
                .get(*kind)
                .ok_or_else(|| OrchestratorError::NoBackend(kind.to_string())),
            BackendSelector::ProviderTag(tag) => self
                .by_tag
                .get(tag)
                .and_then(|kind| self.get(*kind))
                .ok_or_else(|| OrchestratorError::NoBackend(tag.clone())),
        }
    }

    /// Backend kinds present in the set
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.by_kind.keys().copied().collect()
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    /// Whether no adapter is registered
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

/// A provisioning request as the marketplace hands it over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Deployment the resources will belong to
    pub deployment_id: DeploymentId,
    /// Lease funding the deployment
    pub lease_id: LeaseId,
    /// Deployment manifest
    pub manifest: Manifest,
    /// How to pick the backend
    pub backend_selector: BackendSelector,
}

/// The deployment engine
pub struct Orchestrator {
    adapters: AdapterSet,
    registry: HandleRegistry,
    emitter: Arc<UsageEmitter>,
    retry: Backoff,
    retry_attempts: u32,
    cancel: CancellationToken,
    deployments: Mutex<HashMap<DeploymentId, CancellationToken>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create the engine over a set of adapters
    pub fn new(
        adapters: AdapterSet,
        emitter: Arc<UsageEmitter>,
        engine: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapters,
            registry: HandleRegistry::new(),
            emitter,
            retry: engine.retry_backoff(),
            retry_attempts: engine.retry_attempts,
            cancel,
            deployments: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Provision a deployment and wait for its handle.
    ///
    /// The manifest is validated and the backend resolved before any
    /// backend call. Transient deploy failures retry with backoff up to
    /// the configured attempts; permanent failures surface immediately.
    /// Cancelling the deployment takes the adapter's compensation path,
    /// so a cancelled deploy leaves nothing behind.
    pub async fn provision(&self, req: ProvisionRequest) -> Result<gantry_core::ResourceHandle> {
        req.manifest.validate()?;
        let adapter = self.adapters.resolve(&req.backend_selector)?;
        info!(
            "Provisioning {} on {} backend (lease {})",
            req.deployment_id,
            adapter.backend(),
            req.lease_id
        );

        let token = self.cancel.child_token();
        {
            let mut deployments = self.deployments.lock().await;
            deployments.insert(req.deployment_id.clone(), token.clone());
        }
        let result = self.provision_inner(&req, adapter, &token).await;
        self.deployments.lock().await.remove(&req.deployment_id);

        if let Err(e) = &result {
            warn!("Deployment {} failed: {}", req.deployment_id, e);
        }
        result
    }

    async fn provision_inner(
        &self,
        req: &ProvisionRequest,
        adapter: Arc<dyn CloudAdapter>,
        cancel: &CancellationToken,
    ) -> Result<gantry_core::ResourceHandle> {
        let deploy_req = DeployRequest::new(
            req.deployment_id.clone(),
            req.lease_id.clone(),
            req.manifest.clone(),
        );
        let opts = DeployOptions::default();

        let handle = retry_transient(
            || adapter.deploy(&deploy_req, &opts, cancel),
            self.retry,
            self.retry_attempts,
            cancel,
        )
        .await?;

        self.registry
            .insert(handle.clone(), req.manifest.aggregate_resources())
            .await;
        info!(
            "Deployment {} ready: {} on {}",
            req.deployment_id, handle.id, handle.backend
        );
        Ok(handle)
    }

    /// Provision in a spawned worker. Deployments submitted this way
    /// run fully in parallel; failures are recorded in the log and the
    /// deployment simply never appears in the registry.
    pub async fn spawn_provision(self: &Arc<Self>, req: ProvisionRequest) {
        let engine = Arc::clone(self);
        let worker = tokio::spawn(async move {
            let _ = engine.provision(req).await;
        });
        self.workers.lock().await.push(worker);
    }

    /// Cancel an in-flight deployment. Returns false when no deployment
    /// with this ID is currently provisioning.
    pub async fn cancel_deployment(&self, id: &DeploymentId) -> bool {
        let deployments = self.deployments.lock().await;
        match deployments.get(id) {
            Some(token) => {
                info!("Cancelling deployment {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one adapter operation on a registered resource.
    ///
    /// Holds the resource's entry lock across the whole call, which is
    /// what serializes same-resource operations. Transient failures
    /// retry here, indeterminate failures park the resource in Error
    /// for the reconciliation sweep, and every failure is recorded on
    /// the entry before it is returned.
    async fn run_on<F, Fut>(
        &self,
        id: &ResourceId,
        verb: &'static str,
        op: F,
        on_success: impl FnOnce(&mut HandleRecord),
    ) -> Result<()>
    where
        F: Fn(Arc<dyn CloudAdapter>) -> Fut,
        Fut: Future<Output = gantry_core::Result<()>>,
    {
        let entry = self
            .registry
            .entry(id)
            .await
            .ok_or_else(|| OrchestratorError::UnknownResource(id.clone()))?;
        let mut record = entry.lock().await;
        let adapter = self
            .adapters
            .get(record.handle.backend)
            .ok_or_else(|| OrchestratorError::NoBackend(record.handle.backend.to_string()))?;

        let result = retry_transient(
            || op(adapter.clone()),
            self.retry,
            self.retry_attempts,
            &self.cancel,
        )
        .await;

        match result {
            Ok(()) => {
                on_success(&mut record);
                record.last_error = None;
                info!("Resource {} {}: state {}", id, verb, record.state);
                Ok(())
            }
            Err(e) => {
                record.last_error = Some(e.to_string());
                if e.needs_reconciliation() {
                    warn!("Resource {} left indeterminate: {}", id, e);
                    record.state = ResourceState::Error;
                }
                Err(e.into())
            }
        }
    }

    /// Power on a stopped resource
    pub async fn start(&self, id: &ResourceId) -> Result<()> {
        let cancel = self.cancel.clone();
        self.run_on(
            id,
            "started",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                async move { adapter.start(&id, &cancel).await }
            },
            |record| record.state = ResourceState::Active,
        )
        .await
    }

    /// Power off a running resource
    pub async fn stop(&self, id: &ResourceId) -> Result<()> {
        let cancel = self.cancel.clone();
        self.run_on(
            id,
            "stopped",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                async move { adapter.stop(&id, &cancel).await }
            },
            |record| record.state = ResourceState::Stopped,
        )
        .await
    }

    /// Freeze execution, keeping the resource resident
    pub async fn pause(&self, id: &ResourceId) -> Result<()> {
        let cancel = self.cancel.clone();
        self.run_on(
            id,
            "paused",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                async move { adapter.pause(&id, &cancel).await }
            },
            |record| record.state = ResourceState::Paused,
        )
        .await
    }

    /// Resume a paused resource
    pub async fn unpause(&self, id: &ResourceId) -> Result<()> {
        let cancel = self.cancel.clone();
        self.run_on(
            id,
            "unpaused",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                async move { adapter.unpause(&id, &cancel).await }
            },
            |record| record.state = ResourceState::Active,
        )
        .await
    }

    /// Save state to disk and release the resource from its host
    pub async fn suspend(&self, id: &ResourceId) -> Result<()> {
        let cancel = self.cancel.clone();
        self.run_on(
            id,
            "suspended",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                async move { adapter.suspend(&id, &cancel).await }
            },
            |record| record.state = ResourceState::Suspended,
        )
        .await
    }

    /// Restore a suspended resource
    pub async fn resume(&self, id: &ResourceId) -> Result<()> {
        let cancel = self.cancel.clone();
        self.run_on(
            id,
            "resumed",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                async move { adapter.resume(&id, &cancel).await }
            },
            |record| record.state = ResourceState::Active,
        )
        .await
    }

    /// Change the resource's compute allocation. On success the new
    /// allocation becomes the basis for usage reporting.
    pub async fn resize(&self, id: &ResourceId, resources: &ResourceRequest) -> Result<()> {
        let cancel = self.cancel.clone();
        let wanted = resources.clone();
        self.run_on(
            id,
            "resized",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                let wanted = wanted.clone();
                async move { adapter.resize(&id, &wanted, &cancel).await }
            },
            |record| record.resources = resources.clone(),
        )
        .await
    }

    /// Capture a named point-in-time snapshot
    pub async fn snapshot(&self, id: &ResourceId, name: &str) -> Result<()> {
        let cancel = self.cancel.clone();
        let name = name.to_string();
        self.run_on(
            id,
            "snapshotted",
            move |adapter| {
                let id = id.clone();
                let cancel = cancel.clone();
                let name = name.clone();
                async move { adapter.snapshot(&id, &name, &cancel).await }
            },
            |_record| {},
        )
        .await
    }

    /// Destroy a resource and emit its usage record.
    ///
    /// Idempotent at this layer too: unknown IDs succeed, and deleting
    /// an already-deleted resource re-drives only the usage emission,
    /// which the ledger keeps exactly-once. That makes a delete whose
    /// emission failed safely retryable end to end.
    pub async fn delete(&self, id: &ResourceId) -> Result<()> {
        let Some(entry) = self.registry.entry(id).await else {
            debug!("Delete of unknown resource {}, nothing to do", id);
            return Ok(());
        };
        let mut record = entry.lock().await;

        if record.state != ResourceState::Deleted {
            let adapter = self
                .adapters
                .get(record.handle.backend)
                .ok_or_else(|| OrchestratorError::NoBackend(record.handle.backend.to_string()))?;
            let result = retry_transient(
                || {
                    let id = id.clone();
                    let cancel = self.cancel.clone();
                    let adapter = adapter.clone();
                    async move { adapter.delete(&id, &cancel).await }
                },
                self.retry,
                self.retry_attempts,
                &self.cancel,
            )
            .await;

            match result {
                Ok(()) => {
                    record.state = ResourceState::Deleted;
                    record.last_error = None;
                    info!("Resource {} deleted", id);
                }
                Err(e) => {
                    record.last_error = Some(e.to_string());
                    if e.needs_reconciliation() {
                        record.state = ResourceState::Error;
                    }
                    return Err(e.into());
                }
            }
        }

        let lifetime = (Utc::now() - record.handle.created_at)
            .to_std()
            .unwrap_or_default();
        self.emitter
            .emit_vm_deleted(id, &record.resources, lifetime)
            .await?;
        Ok(())
    }

    /// Current status of one resource. No side effects.
    pub async fn status(&self, id: &ResourceId) -> Option<ResourceStatus> {
        self.registry.status(id).await
    }

    /// Status of every tracked resource
    pub async fn statuses(&self) -> Vec<ResourceStatus> {
        self.registry.statuses().await
    }

    /// Re-query every Error resource against its backend, adopting any
    /// definitive answer. Returns how many resources were adopted.
    pub async fn reconcile_once(&self) -> usize {
        let ids = self.registry.ids_in_state(ResourceState::Error).await;
        if ids.is_empty() {
            return 0;
        }
        debug!("Reconciling {} resources in Error", ids.len());

        let mut adopted = 0;
        for id in ids {
            match self.reconcile_resource(&id).await {
                Ok(true) => adopted += 1,
                Ok(false) => {}
                Err(e) => debug!("Reconcile of {} failed: {}", id, e),
            }
        }
        if adopted > 0 {
            info!("Reconciliation adopted {} definitive states", adopted);
        }
        adopted
    }

    async fn reconcile_resource(&self, id: &ResourceId) -> Result<bool> {
        let Some(entry) = self.registry.entry(id).await else {
            return Ok(false);
        };
        let mut record = entry.lock().await;
        if record.state != ResourceState::Error {
            // Raced with an operation that already settled it.
            return Ok(false);
        }
        let adapter = self
            .adapters
            .get(record.handle.backend)
            .ok_or_else(|| OrchestratorError::NoBackend(record.handle.backend.to_string()))?;

        match adapter.state(id).await {
            Ok(state) => {
                info!("Reconciled {}: backend reports {}", id, state);
                record.state = state;
                record.last_error = None;
                if state == ResourceState::Deleted {
                    let lifetime = (Utc::now() - record.handle.created_at)
                        .to_std()
                        .unwrap_or_default();
                    self.emitter
                        .emit_vm_deleted(id, &record.resources, lifetime)
                        .await?;
                }
                Ok(true)
            }
            Err(AdapterError::NotFound(_)) => {
                info!("Reconciled {}: gone from backend, marking deleted", id);
                record.state = ResourceState::Deleted;
                record.last_error = None;
                let lifetime = (Utc::now() - record.handle.created_at)
                    .to_std()
                    .unwrap_or_default();
                self.emitter
                    .emit_vm_deleted(id, &record.resources, lifetime)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                debug!("Backend answer for {} not definitive: {}", id, e);
                Ok(false)
            }
        }
    }

    /// Cancel all in-flight work and wait for provisioning workers
    pub async fn shutdown(&self) {
        info!("Engine shutting down, cancelling in-flight work");
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().await;
            workers.drain(..).collect()
        };
        let results = join_all(workers).await;
        let panicked = results.iter().filter(|r| r.is_err()).count();
        if panicked > 0 {
            warn!("{} provisioning workers ended abnormally", panicked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use gantry_core::{ResourceHandle, ResourceKind, ServiceSpec};

    use crate::usage::{BillingSink, MemoryLedger, UsageRecord};

    struct CountingSink {
        count: AtomicU32,
    }

    #[async_trait]
    impl BillingSink for CountingSink {
        async fn submit(&self, _record: &UsageRecord) -> gantry_core::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Adapter whose behavior is scripted per test
    struct ScriptedAdapter {
        deploy_calls: AtomicU32,
        delete_calls: AtomicU32,
        transient_deploy_failures: AtomicU32,
        quota_deploy: AtomicBool,
        hang_deploy: AtomicBool,
        indeterminate_stop: AtomicBool,
        // None means the backend no longer knows the resource
        backend_state: Mutex<Option<ResourceState>>,
    }

    impl ScriptedAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                deploy_calls: AtomicU32::new(0),
                delete_calls: AtomicU32::new(0),
                transient_deploy_failures: AtomicU32::new(0),
                quota_deploy: AtomicBool::new(false),
                hang_deploy: AtomicBool::new(false),
                indeterminate_stop: AtomicBool::new(false),
                backend_state: Mutex::new(Some(ResourceState::Active)),
            })
        }
    }

    #[async_trait]
    impl CloudAdapter for ScriptedAdapter {
        fn backend(&self) -> BackendKind {
            BackendKind::OpenStack
        }

        async fn deploy(
            &self,
            req: &DeployRequest,
            _opts: &DeployOptions,
            cancel: &CancellationToken,
        ) -> gantry_core::Result<ResourceHandle> {
            self.deploy_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_deploy.load(Ordering::SeqCst) {
                cancel.cancelled().await;
                return Err(AdapterError::Cancelled);
            }
            if self.quota_deploy.load(Ordering::SeqCst) {
                return Err(AdapterError::quota("cores exhausted in region"));
            }
            let remaining = self.transient_deploy_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_deploy_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AdapterError::transient("backend briefly unreachable"));
            }
            Ok(ResourceHandle::active(
                ResourceId::new(format!("scripted-{}", req.deployment_id)),
                ResourceKind::Server,
                BackendKind::OpenStack,
                req.deployment_id.clone(),
                req.lease_id.clone(),
                "scripted",
            ))
        }

        async fn start(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn stop(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            if self.indeterminate_stop.swap(false, Ordering::SeqCst) {
                return Err(AdapterError::indeterminate("connection dropped mid-stop"));
            }
            Ok(())
        }

        async fn pause(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn unpause(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn suspend(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn resume(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn delete(&self, _id: &ResourceId, _c: &CancellationToken) -> gantry_core::Result<()> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resize(
            &self,
            _id: &ResourceId,
            _resources: &ResourceRequest,
            _c: &CancellationToken,
        ) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn snapshot(
            &self,
            _id: &ResourceId,
            _name: &str,
            _c: &CancellationToken,
        ) -> gantry_core::Result<()> {
            Ok(())
        }

        async fn state(&self, id: &ResourceId) -> gantry_core::Result<ResourceState> {
            match *self.backend_state.lock().await {
                Some(state) => Ok(state),
                None => Err(AdapterError::not_found(id.to_string())),
            }
        }
    }

    fn engine(adapter: Arc<ScriptedAdapter>) -> (Arc<Orchestrator>, Arc<CountingSink>) {
        let mut adapters = AdapterSet::new();
        adapters.register("dc-test", adapter);
        let sink = Arc::new(CountingSink {
            count: AtomicU32::new(0),
        });
        let emitter = Arc::new(UsageEmitter::new(Arc::new(MemoryLedger::new()), sink.clone()));
        let config = EngineConfig {
            retry_initial_ms: 1,
            retry_max_secs: 1,
            retry_attempts: 4,
            reconcile_interval_secs: 60,
        };
        let engine = Orchestrator::new(adapters, emitter, &config, CancellationToken::new());
        (Arc::new(engine), sink)
    }

    fn request(deployment: &str) -> ProvisionRequest {
        ProvisionRequest {
            deployment_id: DeploymentId::new(deployment),
            lease_id: LeaseId::new("lease-1"),
            manifest: Manifest::new("1.0").with_service(ServiceSpec::new(
                "web",
                "ubuntu-24.04",
                ResourceRequest::new(2000, 2 * 1024 * 1024 * 1024),
            )),
            backend_selector: BackendSelector::Backend(BackendKind::OpenStack),
        }
    }

    #[tokio::test]
    async fn test_manifest_validated_before_any_backend_call() {
        let adapter = ScriptedAdapter::new();
        let (engine, _sink) = engine(adapter.clone());

        let mut req = request("dep-1");
        req.manifest = Manifest::new("2.0").with_service(ServiceSpec::new(
            "web",
            "ubuntu-24.04",
            ResourceRequest::new(1000, 1024),
        ));

        let err = engine.provision(req).await.unwrap_err();
        assert!(
            matches!(err, OrchestratorError::Adapter(AdapterError::Manifest(_))),
            "got {err}"
        );
        assert_eq!(adapter.deploy_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_deploy_failures_retried_to_success() {
        let adapter = ScriptedAdapter::new();
        adapter.transient_deploy_failures.store(2, Ordering::SeqCst);
        let (engine, _sink) = engine(adapter.clone());

        let handle = engine.provision(request("dep-1")).await.unwrap();

        assert_eq!(adapter.deploy_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            engine.status(&handle.id).await.unwrap().state,
            ResourceState::Active
        );
    }

    #[tokio::test]
    async fn test_quota_failure_surfaces_without_retry() {
        let adapter = ScriptedAdapter::new();
        adapter.quota_deploy.store(true, Ordering::SeqCst);
        let (engine, _sink) = engine(adapter.clone());

        let err = engine.provision(request("dep-1")).await.unwrap_err();

        assert!(
            matches!(err, OrchestratorError::Adapter(AdapterError::QuotaExceeded(_))),
            "got {err}"
        );
        assert_eq!(adapter.deploy_calls.load(Ordering::SeqCst), 1, "quota must not retry");
        assert!(engine.statuses().await.is_empty(), "no orphan handle may remain");
    }

    #[tokio::test]
    async fn test_selector_resolves_by_kind_and_tag() {
        let adapter = ScriptedAdapter::new();
        let (engine, _sink) = engine(adapter);

        let mut req = request("dep-1");
        req.backend_selector = BackendSelector::ProviderTag("dc-test".to_string());
        engine.provision(req).await.unwrap();

        let mut req = request("dep-2");
        req.backend_selector = BackendSelector::ProviderTag("dc-elsewhere".to_string());
        let err = engine.provision(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoBackend(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_indeterminate_failure_parks_resource_for_reconciliation() {
        let adapter = ScriptedAdapter::new();
        let (engine, _sink) = engine(adapter.clone());
        let handle = engine.provision(request("dep-1")).await.unwrap();

        adapter.indeterminate_stop.store(true, Ordering::SeqCst);
        let err = engine.stop(&handle.id).await.unwrap_err();
        assert!(
            matches!(err, OrchestratorError::Adapter(AdapterError::Indeterminate(_))),
            "got {err}"
        );

        let status = engine.status(&handle.id).await.unwrap();
        assert_eq!(status.state, ResourceState::Error);
        assert!(status.last_error.is_some());

        // The backend settled on Stopped; the sweep adopts it.
        *adapter.backend_state.lock().await = Some(ResourceState::Stopped);
        assert_eq!(engine.reconcile_once().await, 1);
        let status = engine.status(&handle.id).await.unwrap();
        assert_eq!(status.state, ResourceState::Stopped);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_adopts_deletion_and_emits_usage() {
        let adapter = ScriptedAdapter::new();
        let (engine, sink) = engine(adapter.clone());
        let handle = engine.provision(request("dep-1")).await.unwrap();

        adapter.indeterminate_stop.store(true, Ordering::SeqCst);
        let _ = engine.stop(&handle.id).await;
        *adapter.backend_state.lock().await = None;

        assert_eq!(engine.reconcile_once().await, 1);
        assert_eq!(
            engine.status(&handle.id).await.unwrap().state,
            ResourceState::Deleted
        );
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);

        // A later delete of the same resource must not bill again.
        engine.delete(&handle.id).await.unwrap();
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_bills_once() {
        let adapter = ScriptedAdapter::new();
        let (engine, sink) = engine(adapter.clone());
        let handle = engine.provision(request("dep-1")).await.unwrap();

        engine.delete(&handle.id).await.unwrap();
        engine.delete(&handle.id).await.unwrap();
        engine.delete(&ResourceId::new("never-existed")).await.unwrap();

        assert_eq!(adapter.delete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.status(&handle.id).await.unwrap().state,
            ResourceState::Deleted
        );
    }

    #[tokio::test]
    async fn test_cancel_deployment_stops_spawned_worker() {
        let adapter = ScriptedAdapter::new();
        adapter.hang_deploy.store(true, Ordering::SeqCst);
        let (engine, _sink) = engine(adapter);

        let req = request("dep-1");
        let deployment_id = req.deployment_id.clone();
        engine.spawn_provision(req).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(engine.cancel_deployment(&deployment_id).await);
        engine.shutdown().await;

        assert!(engine.statuses().await.is_empty(), "cancelled deploy must leave nothing");
        assert!(!engine.cancel_deployment(&deployment_id).await, "worker already gone");
    }
}
