//! # Gantry Orchestrator
//!
//! Resource provisioning engine for compute marketplace deployments.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator (engine)          Backends (adapters)
//! ├── Backend selection    ────→  OpenStack region
//! ├── Retry / cancellation ────→  vSphere vCenter
//! ├── Handle registry      ────→  Ansible host sets
//! ├── Reconciliation sweep ─────┘
//! └── Usage emission       ────→  Billing sink
//! ```
//!
//! The engine validates each deployment manifest, resolves it to exactly
//! one backend, and drives the adapter until the resources are ready or
//! definitively failed. Operations on the same resource are serialized;
//! different resources proceed in parallel. Failures an adapter reports
//! as indeterminate park the resource in an Error state that the
//! reconciliation sweep resolves by re-querying the backend.
//!
//! Lifecycle ends are billed exactly once: every terminal transition is
//! checked against an emission ledger before the billing sink sees it,
//! so retried deletes and replayed reconciliations never double-charge.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod registry;
pub mod usage;

// ============================================================================
// Public exports - Engine API
// ============================================================================

// Deployment engine
pub use engine::{AdapterSet, Orchestrator, ProvisionRequest};

// Error handling
pub use error::{OrchestratorError, Result};

// Resource tracking
pub use registry::{HandleRecord, HandleRegistry, ResourceStatus};

// Reconciliation driver
pub use reconcile::Reconciler;

// ============================================================================
// Public exports - Configuration and billing
// ============================================================================

// Daemon configuration
pub use config::{EngineConfig, GantryConfig};

// Usage emission
pub use usage::{
    BillingSink, EmissionLedger, LoggingSink, MemoryLedger, Quantities, UsageEmitter, UsageRecord,
};
