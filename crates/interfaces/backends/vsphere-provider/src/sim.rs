//! Scripted stand-in for the management API
//!
//! Tasks progress one state per status poll: Queued on the first poll,
//! Running for a configurable number of polls, then their terminal
//! state. A task's side effect (the VM appearing, a power change) is
//! applied at the moment it reaches Success, never earlier, so tests
//! observe the same ordering a real backend gives: submit, poll, then
//! see the result.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use gantry_core::{AdapterError, ResourceId, ResourceRequest, Result};

use crate::task::{TaskId, TaskState, TaskStatus};
use crate::vim::{CloneSpec, PowerState, VimPort};

#[derive(Debug)]
struct SimVm {
    power: PowerState,
    tools: bool,
    resources: ResourceRequest,
    snapshots: Vec<String>,
}

#[derive(Debug, Clone)]
enum Effect {
    CreateVm { vm: ResourceId, resources: ResourceRequest },
    PowerOn(ResourceId),
    PowerOff(ResourceId),
    Suspend(ResourceId),
    Reconfigure(ResourceId, ResourceRequest),
    Snapshot(ResourceId, String),
    Destroy(ResourceId),
}

#[derive(Debug, Clone)]
enum Terminal {
    Success,
    Error(String),
    Never,
}

#[derive(Debug)]
struct SimTask {
    number: u64,
    queued: bool,
    polls_left: u32,
    terminal: Terminal,
    effect: Effect,
    applied: bool,
}

#[derive(Debug)]
struct SimState {
    vms: HashMap<ResourceId, SimVm>,
    tasks: HashMap<TaskId, SimTask>,
    cancelled: HashSet<u64>,
    next_task: u64,
    next_vm: u64,

    // Behavior knobs
    task_polls: u32,
    fail_at: Option<(u64, String)>,
    stick_at: Option<u64>,
    new_vm_tools: bool,

    // Counters for assertions
    guest_shutdowns: u32,
    power_off_tasks: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            vms: HashMap::new(),
            tasks: HashMap::new(),
            cancelled: HashSet::new(),
            next_task: 0,
            next_vm: 0,
            task_polls: 1,
            fail_at: None,
            stick_at: None,
            new_vm_tools: true,
            guest_shutdowns: 0,
            power_off_tasks: 0,
        }
    }
}

/// Scripted management API used by tests and lab mode
#[derive(Debug, Default)]
pub struct SimVim {
    state: Mutex<SimState>,
}

impl SimVim {
    /// Backend with no VMs where tasks succeed after one Running poll
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of Running polls before a task completes
    pub fn with_task_polls(mut self, polls: u32) -> Self {
        self.state.get_mut().task_polls = polls;
        self
    }

    /// New VMs come up without guest tools
    pub fn without_guest_tools(mut self) -> Self {
        self.state.get_mut().new_vm_tools = false;
        self
    }

    /// Make the `n`th submitted task (1-based) end in Error
    pub async fn fail_task(&self, n: u64, message: impl Into<String>) {
        self.state.lock().await.fail_at = Some((n, message.into()));
    }

    /// Make the `n`th submitted task (1-based) run forever
    pub async fn stick_task(&self, n: u64) {
        self.state.lock().await.stick_at = Some(n);
    }

    /// Number of VMs currently present
    pub async fn vm_count(&self) -> usize {
        self.state.lock().await.vms.len()
    }

    /// Power state of a VM, if it exists
    pub async fn power_of(&self, id: &ResourceId) -> Option<PowerState> {
        self.state.lock().await.vms.get(id).map(|vm| vm.power)
    }

    /// Resources currently allocated to a VM
    pub async fn resources_of(&self, id: &ResourceId) -> Option<ResourceRequest> {
        self.state
            .lock()
            .await
            .vms
            .get(id)
            .map(|vm| vm.resources.clone())
    }

    /// Snapshot names taken on a VM
    pub async fn snapshots_of(&self, id: &ResourceId) -> Vec<String> {
        self.state
            .lock()
            .await
            .vms
            .get(id)
            .map(|vm| vm.snapshots.clone())
            .unwrap_or_default()
    }

    /// Whether the `n`th submitted task was cancelled
    pub async fn task_cancelled(&self, n: u64) -> bool {
        self.state.lock().await.cancelled.contains(&n)
    }

    /// How many clean guest shutdowns were requested
    pub async fn guest_shutdown_count(&self) -> u32 {
        self.state.lock().await.guest_shutdowns
    }

    /// How many hard power-off tasks were submitted
    pub async fn hard_power_off_count(&self) -> u32 {
        self.state.lock().await.power_off_tasks
    }

    async fn submit(&self, effect: Effect) -> TaskId {
        let mut state = self.state.lock().await;
        state.next_task += 1;
        let number = state.next_task;

        let terminal = if state.fail_at.as_ref().map(|(n, _)| *n) == Some(number) {
            match state.fail_at.take() {
                Some((_, message)) => Terminal::Error(message),
                None => Terminal::Success,
            }
        } else if state.stick_at == Some(number) {
            state.stick_at = None;
            Terminal::Never
        } else {
            Terminal::Success
        };

        let polls_left = state.task_polls;
        let id = TaskId::new(format!("task-{number}"));
        state.tasks.insert(
            id.clone(),
            SimTask {
                number,
                queued: true,
                polls_left,
                terminal,
                effect,
                applied: false,
            },
        );
        id
    }

    async fn require_vm(&self, vm: &ResourceId) -> Result<()> {
        if self.state.lock().await.vms.contains_key(vm) {
            Ok(())
        } else {
            Err(AdapterError::not_found(format!("vm {vm}")))
        }
    }
}

fn apply_effect(state: &mut SimState, effect: &Effect) -> Option<ResourceId> {
    match effect {
        Effect::CreateVm { vm, resources } => {
            state.vms.insert(
                vm.clone(),
                SimVm {
                    power: PowerState::PoweredOff,
                    tools: state.new_vm_tools,
                    resources: resources.clone(),
                    snapshots: Vec::new(),
                },
            );
            Some(vm.clone())
        }
        Effect::PowerOn(vm) => {
            if let Some(v) = state.vms.get_mut(vm) {
                v.power = PowerState::PoweredOn;
            }
            None
        }
        Effect::PowerOff(vm) => {
            if let Some(v) = state.vms.get_mut(vm) {
                v.power = PowerState::PoweredOff;
            }
            None
        }
        Effect::Suspend(vm) => {
            if let Some(v) = state.vms.get_mut(vm) {
                v.power = PowerState::Suspended;
            }
            None
        }
        Effect::Reconfigure(vm, resources) => {
            if let Some(v) = state.vms.get_mut(vm) {
                v.resources = resources.clone();
            }
            None
        }
        Effect::Snapshot(vm, name) => {
            if let Some(v) = state.vms.get_mut(vm) {
                v.snapshots.push(name.clone());
            }
            None
        }
        Effect::Destroy(vm) => {
            state.vms.remove(vm);
            None
        }
    }
}

fn effect_entity(effect: &Effect) -> Option<ResourceId> {
    match effect {
        Effect::CreateVm { vm, .. } => Some(vm.clone()),
        _ => None,
    }
}

#[async_trait]
impl VimPort for SimVim {
    async fn clone_from_template(&self, spec: &CloneSpec) -> Result<TaskId> {
        let vm = {
            let mut state = self.state.lock().await;
            state.next_vm += 1;
            ResourceId::new(format!("vm-{}", state.next_vm))
        };
        Ok(self
            .submit(Effect::CreateVm {
                vm,
                resources: spec.resources.clone(),
            })
            .await)
    }

    async fn reconfigure_vm(&self, vm: &ResourceId, resources: &ResourceRequest) -> Result<TaskId> {
        self.require_vm(vm).await?;
        Ok(self
            .submit(Effect::Reconfigure(vm.clone(), resources.clone()))
            .await)
    }

    async fn power_on(&self, vm: &ResourceId) -> Result<TaskId> {
        self.require_vm(vm).await?;
        Ok(self.submit(Effect::PowerOn(vm.clone())).await)
    }

    async fn power_off(&self, vm: &ResourceId) -> Result<TaskId> {
        self.require_vm(vm).await?;
        self.state.lock().await.power_off_tasks += 1;
        Ok(self.submit(Effect::PowerOff(vm.clone())).await)
    }

    async fn suspend_vm(&self, vm: &ResourceId) -> Result<TaskId> {
        self.require_vm(vm).await?;
        Ok(self.submit(Effect::Suspend(vm.clone())).await)
    }

    async fn create_snapshot(&self, vm: &ResourceId, name: &str) -> Result<TaskId> {
        self.require_vm(vm).await?;
        Ok(self
            .submit(Effect::Snapshot(vm.clone(), name.to_string()))
            .await)
    }

    async fn destroy_vm(&self, vm: &ResourceId) -> Result<TaskId> {
        self.require_vm(vm).await?;
        Ok(self.submit(Effect::Destroy(vm.clone())).await)
    }

    async fn task_status(&self, task: &TaskId) -> Result<TaskStatus> {
        let mut state = self.state.lock().await;

        let number = state
            .tasks
            .get(task)
            .map(|t| t.number)
            .ok_or_else(|| AdapterError::not_found(format!("task {task}")))?;
        if state.cancelled.contains(&number) {
            return Ok(TaskStatus::error("task cancelled"));
        }

        let (effect, needs_apply) = {
            let Some(t) = state.tasks.get_mut(task) else {
                return Err(AdapterError::not_found(format!("task {task}")));
            };
            if t.queued {
                t.queued = false;
                return Ok(TaskStatus::in_flight(TaskState::Queued));
            }
            match &t.terminal {
                Terminal::Never => return Ok(TaskStatus::in_flight(TaskState::Running)),
                _ if t.polls_left > 0 => {
                    t.polls_left -= 1;
                    return Ok(TaskStatus::in_flight(TaskState::Running));
                }
                Terminal::Error(message) => return Ok(TaskStatus::error(message.clone())),
                Terminal::Success => {
                    let needs_apply = !t.applied;
                    t.applied = true;
                    (t.effect.clone(), needs_apply)
                }
            }
        };

        let entity = if needs_apply {
            apply_effect(&mut state, &effect)
        } else {
            effect_entity(&effect)
        };
        Ok(TaskStatus::success(entity))
    }

    async fn cancel_task(&self, task: &TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let number = state
            .tasks
            .get(task)
            .map(|t| t.number)
            .ok_or_else(|| AdapterError::not_found(format!("task {task}")))?;
        state.cancelled.insert(number);
        Ok(())
    }

    async fn vm_power_state(&self, vm: &ResourceId) -> Result<PowerState> {
        self.state
            .lock()
            .await
            .vms
            .get(vm)
            .map(|v| v.power)
            .ok_or_else(|| AdapterError::not_found(format!("vm {vm}")))
    }

    async fn guest_tools_running(&self, vm: &ResourceId) -> Result<bool> {
        self.state
            .lock()
            .await
            .vms
            .get(vm)
            .map(|v| v.tools && v.power == PowerState::PoweredOn)
            .ok_or_else(|| AdapterError::not_found(format!("vm {vm}")))
    }

    async fn shutdown_guest(&self, vm: &ResourceId) -> Result<()> {
        let mut state = self.state.lock().await;
        let v = state
            .vms
            .get_mut(vm)
            .ok_or_else(|| AdapterError::not_found(format!("vm {vm}")))?;
        if !v.tools || v.power != PowerState::PoweredOn {
            return Err(AdapterError::backend(format!(
                "guest tools not running in vm {vm}"
            )));
        }
        v.power = PowerState::PoweredOff;
        state.guest_shutdowns += 1;
        Ok(())
    }
}
