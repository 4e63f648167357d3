//! Handle registry with per-resource serialization
//!
//! The registry is the orchestrator's memory of what exists: every
//! deployed handle, its current state, and the last error seen. The
//! outer map lock is held only for insert and lookup; each record has
//! its own lock, and the engine holds that lock across the whole
//! backend call so same-resource operations serialize while different
//! resources proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use gantry_core::{BackendKind, ResourceHandle, ResourceId, ResourceRequest, ResourceState};

/// Everything the orchestrator tracks about one resource
#[derive(Debug)]
pub struct HandleRecord {
    /// Handle as the adapter returned it
    pub handle: ResourceHandle,
    /// Aggregate compute behind the resource, kept for usage reporting
    pub resources: ResourceRequest,
    /// Current state as the orchestrator believes it
    pub state: ResourceState,
    /// Last operation failure, cleared on success
    pub last_error: Option<String>,
}

/// Side-effect-free view of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    /// Resource identifier
    pub id: ResourceId,
    /// Backend that owns the resource
    pub backend: BackendKind,
    /// Current state
    pub state: ResourceState,
    /// Last operation failure, if any
    pub last_error: Option<String>,
}

/// Registry of every handle the orchestrator owns
#[derive(Default)]
pub struct HandleRegistry {
    entries: Mutex<HashMap<ResourceId, Arc<Mutex<HandleRecord>>>>,
}

impl HandleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly deployed handle
    pub async fn insert(&self, handle: ResourceHandle, resources: ResourceRequest) {
        let id = handle.id.clone();
        let record = HandleRecord {
            state: handle.state,
            handle,
            resources,
            last_error: None,
        };
        let mut entries = self.entries.lock().await;
        entries.insert(id.clone(), Arc::new(Mutex::new(record)));
        debug!("Registered handle {}", id);
    }

    /// The entry for a resource, to be locked by the caller for the
    /// duration of the operation
    pub async fn entry(&self, id: &ResourceId) -> Option<Arc<Mutex<HandleRecord>>> {
        let entries = self.entries.lock().await;
        entries.get(id).cloned()
    }

    /// Current status of one resource
    pub async fn status(&self, id: &ResourceId) -> Option<ResourceStatus> {
        let entry = self.entry(id).await?;
        let record = entry.lock().await;
        Some(ResourceStatus {
            id: record.handle.id.clone(),
            backend: record.handle.backend,
            state: record.state,
            last_error: record.last_error.clone(),
        })
    }

    /// Status of every tracked resource
    pub async fn statuses(&self) -> Vec<ResourceStatus> {
        let entries: Vec<_> = {
            let entries = self.entries.lock().await;
            entries.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = entry.lock().await;
            out.push(ResourceStatus {
                id: record.handle.id.clone(),
                backend: record.handle.backend,
                state: record.state,
                last_error: record.last_error.clone(),
            });
        }
        out
    }

    /// IDs of every resource currently in `state`
    pub async fn ids_in_state(&self, state: ResourceState) -> Vec<ResourceId> {
        let entries: Vec<_> = {
            let entries = self.entries.lock().await;
            entries.values().cloned().collect()
        };
        let mut out = Vec::new();
        for entry in entries {
            let record = entry.lock().await;
            if record.state == state {
                out.push(record.handle.id.clone());
            }
        }
        out
    }
}
