//! Ansible-style backend adapter
//!
//! Provisions by running playbooks against a configured host inventory
//! instead of calling a cloud API. A run's real outcome comes from its
//! PLAY RECAP block: per-host ok/changed/unreachable/failed counts,
//! which are authoritative over the process exit code because some
//! runners exit 0 on partial failure.
//!
//! Hosts are bare metal or provisioned elsewhere, so most lifecycle
//! operations only exist if the operator configured a playbook for
//! them; the rest are reported as permanently unsupported.

pub mod adapter;
pub mod inventory;
pub mod recap;
pub mod runner;

pub use adapter::{AnsibleAdapter, AnsibleConfig, HostEntry, PlaybookSet};
pub use inventory::{Inventory, InventoryHost};
pub use recap::HostRecap;
pub use runner::{ExecutionId, ExecutionResult, ExecutionState, PlaybookRunner};
