//! vSphere-style backend adapter
//!
//! Drives a virtualization backend where every mutating call returns a
//! task handle instead of a result. The adapter polls each task to
//! completion and only proceeds on Success, so a deploy is a chain of
//! task waits: clone the template, reconfigure sizing, power on.
//!
//! Guest operations (clean shutdown) are separate from power
//! operations (hard off) and only work when guest tools are running
//! inside the VM; the adapter prefers the clean path and falls back.

pub mod adapter;
pub mod sim;
pub mod task;
pub mod vim;

pub use adapter::{VSphereAdapter, VSphereConfig, DEFAULT_TASK_TIMEOUT_SECS};
pub use sim::SimVim;
pub use task::{TaskId, TaskState, TaskStatus};
pub use vim::{CloneSpec, PowerState, VimPort};
