//! OpenStack-style backend adapter
//!
//! Drives an IaaS backend whose create calls return synchronously and
//! whose resources are polled until they report a ready status. A
//! deployment becomes one server plus its attached ports and volumes;
//! if any step fails, everything built so far is deleted before the
//! error is returned.
//!
//! The compute, network, and block storage endpoints are reached
//! through the port traits in [`ports`]; [`lab`] provides an in-memory
//! region used by tests and the daemon's lab mode.

pub mod adapter;
pub mod lab;
pub mod ports;

pub use adapter::{OpenStackAdapter, OpenStackConfig, DEFAULT_READY_DEADLINE_SECS};
pub use lab::LabCloud;
pub use ports::{BlockStoragePort, ComputePort, CreateServer, NetworkPort, ServerStatus};
