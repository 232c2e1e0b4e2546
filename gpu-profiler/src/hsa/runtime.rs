//! Compute runtime queries

use crate::error::RuntimeError;
use kernscope_shared::KernelCodeDescriptor;
use std::fmt;

/// Runtime agent (device) handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentHandle(pub u64);

impl fmt::Display for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Dispatch queue as seen by interception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Queue {
    /// Runtime-assigned id, unique among open queues
    pub id: u64,
}

/// Completion signal of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Dsp,
}

/// Agent queries the profiler needs from the runtime
pub trait HsaRuntime: Send + Sync {
    fn device_kind(&self, agent: AgentHandle) -> Result<DeviceKind, RuntimeError>;

    /// Vendor chip id used to look up the device's display name
    fn chip_id(&self, agent: AgentHandle) -> Result<u32, RuntimeError>;

    fn compute_unit_count(&self, agent: AgentHandle) -> Result<u32, RuntimeError>;

    /// All agents known to the runtime
    fn agents(&self) -> Result<Vec<AgentHandle>, RuntimeError>;

    /// Host address of a loaded code object's kernel descriptor. `None` when
    /// the runtime has no loader extension or the address is not loaded.
    fn loaded_code_object_host_address(&self, _device_address: u64) -> Option<u64> {
        None
    }

    fn is_gpu(&self, agent: AgentHandle) -> bool {
        matches!(self.device_kind(agent), Ok(DeviceKind::Gpu))
    }
}

/// Read access to kernel code descriptors
pub trait DescriptorMemory: Send + Sync {
    fn read_descriptor(&self, address: u64) -> Option<KernelCodeDescriptor>;
}
