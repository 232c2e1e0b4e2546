//! Dispatch scenarios for replay
//!
//! A scenario describes a simulated machine (agents, counters, loaded
//! kernels) and the dispatches to push through the profiler:
//!
//! ```toml
//! [[device]]
//! agent = 1
//! chip_id = 0x7300
//! name = "Fiji"
//! generation = "volcanic-islands"
//! compute_units = 64
//! counters = ["SQ_WAVES"]
//!
//! [[counter]]
//! name = "SQ_WAVES"
//! type = "uint32"
//! value = 4096.0
//!
//! [[kernel]]
//! name = "matmul"
//! object = 0x1000
//! vgprs = 32
//!
//! [[dispatch]]
//! queue = 1
//! agent = 1
//! kernel = "matmul"
//! grid = [1024, 1024]
//! workgroup = [16, 16]
//! ```

use anyhow::{bail, Context, Result};
use kernscope_pmc::device::{DeviceTable, HwGeneration};
use kernscope_pmc::hsa::{AgentHandle, DeviceKind, FinalizerInfo};
use kernscope_pmc::sim::{SimAgent, SimCounter, SimEngine, SimMemory, SimRuntime};
use kernscope_shared::{
    CounterType, DispatchPacket, KernelCodeDescriptor, PACKET_TYPE_KERNEL_DISPATCH,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub engine: EngineSpec,

    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSpec>,

    #[serde(default, rename = "counter")]
    pub counters: Vec<CounterSpec>,

    #[serde(default, rename = "kernel")]
    pub kernels: Vec<KernelSpec>,

    #[serde(default, rename = "dispatch")]
    pub dispatches: Vec<DispatchSpec>,
}

/// Simulated counter engine behaviour
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSpec {
    /// Readiness checks a session needs after it ends
    pub ready_after_polls: u32,

    /// Sessions never complete
    pub never_ready: bool,

    pub pass_count: u32,

    /// Counters selected as if by a counter file
    pub selected: Vec<String>,
}

impl Default for EngineSpec {
    fn default() -> Self {
        Self {
            ready_after_polls: 1,
            never_ready: false,
            pass_count: 1,
            selected: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Gpu,
    Cpu,
    Dsp,
}

impl From<AgentKind> for DeviceKind {
    fn from(kind: AgentKind) -> Self {
        match kind {
            AgentKind::Gpu => DeviceKind::Gpu,
            AgentKind::Cpu => DeviceKind::Cpu,
            AgentKind::Dsp => DeviceKind::Dsp,
        }
    }
}

fn default_kind() -> AgentKind {
    AgentKind::Gpu
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSpec {
    pub agent: u64,

    #[serde(default = "default_kind")]
    pub kind: AgentKind,

    #[serde(default)]
    pub chip_id: u32,

    /// Display name; devices without one resolve to the unknown device name
    pub name: Option<String>,
    pub generation: Option<HwGeneration>,
    pub compute_units: Option<u32>,

    /// Single-pass counters this device offers
    #[serde(default)]
    pub counters: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: CounterType,

    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelSpec {
    pub name: String,

    /// Kernel object handle dispatch packets refer to
    pub object: u64,

    /// Where the loader mapped the descriptor, if not at `object`
    pub host_address: Option<u64>,

    #[serde(default)]
    pub vgprs: u16,
    #[serde(default)]
    pub sgprs: u16,
    #[serde(default)]
    pub lds_bytes: u32,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSpec {
    pub queue: u64,
    pub agent: u64,

    /// Kernel name; unknown names dispatch a kernel without a code object
    pub kernel: String,

    /// Grid size per dimension, 1 to 3 entries
    pub grid: Vec<u32>,
    pub workgroup: Vec<u32>,

    #[serde(default = "default_repeat")]
    pub repeat: u32,

    #[serde(default)]
    pub translation_handle: u64,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
        let scenario = Self::parse(&text)
            .with_context(|| format!("Invalid scenario: {}", path.display()))?;
        Ok(scenario)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        for dispatch in &self.dispatches {
            if !self.devices.iter().any(|d| d.agent == dispatch.agent) {
                bail!("Dispatch on queue {} uses unknown agent {}", dispatch.queue, dispatch.agent);
            }
            if dispatch.grid.is_empty() || dispatch.grid.len() > 3 {
                bail!("Dispatch grid must have 1 to 3 dimensions");
            }
            if dispatch.workgroup.len() != dispatch.grid.len() {
                bail!("Dispatch work-group and grid dimensions differ");
            }
            if dispatch.workgroup.iter().any(|&s| s > u32::from(u16::MAX)) {
                bail!("Work-group size {:?} too large", dispatch.workgroup);
            }
        }

        for counter in &self.engine.selected {
            if !self.counters.iter().any(|c| &c.name == counter) {
                bail!("Selected counter {} is not defined", counter);
            }
        }
        Ok(())
    }

    pub fn engine(&self) -> SimEngine {
        let mut engine = SimEngine::new()
            .without_call_log()
            .with_pass_count(self.engine.pass_count);
        engine = if self.engine.never_ready {
            engine.never_ready()
        } else {
            engine.ready_after_polls(self.engine.ready_after_polls)
        };

        for counter in &self.counters {
            engine = engine.with_counter(SimCounter::new(&counter.name, counter.kind, counter.value));
        }
        for device in &self.devices {
            let names: Vec<&str> = device.counters.iter().map(String::as_str).collect();
            if !names.is_empty() {
                engine = engine.with_device_counters(device.chip_id, &names);
            }
        }

        let selected: Vec<&str> = self.engine.selected.iter().map(String::as_str).collect();
        engine.with_selected(&selected)
    }

    pub fn runtime(&self) -> SimRuntime {
        let mut runtime = SimRuntime::new();
        for device in &self.devices {
            let mut agent = SimAgent::new(device.kind.into(), device.chip_id);
            if let Some(count) = device.compute_units {
                agent = agent.with_compute_units(count);
            }
            runtime = runtime.with_agent(AgentHandle(device.agent), agent);
        }
        for kernel in &self.kernels {
            if let Some(host_address) = kernel.host_address {
                runtime = runtime.with_host_address(kernel.object, host_address);
            }
        }
        runtime
    }

    pub fn memory(&self) -> SimMemory {
        let mut memory = SimMemory::new();
        for kernel in &self.kernels {
            let descriptor = KernelCodeDescriptor {
                version_major: 1,
                workitem_vgpr_count: kernel.vgprs,
                wavefront_sgpr_count: kernel.sgprs,
                workgroup_group_segment_byte_size: kernel.lds_bytes,
                ..Default::default()
            };
            // The loader maps descriptors at the translated address when there is one
            memory.insert(kernel.host_address.unwrap_or(kernel.object), descriptor);
        }
        memory
    }

    pub fn finalizer(&self) -> FinalizerInfo {
        let finalizer = FinalizerInfo::new();
        for (symbol, kernel) in (1u64..).zip(&self.kernels) {
            finalizer.record_code_symbol(kernel.object, symbol);
            finalizer.record_symbol_name(symbol, kernel.name.as_str());
        }
        finalizer
    }

    pub fn devices(&self) -> DeviceTable {
        let mut table = DeviceTable::new();
        for device in &self.devices {
            if let (Some(name), Some(generation)) = (&device.name, device.generation) {
                table.insert(device.chip_id, name.as_str(), generation);
            }
        }
        table
    }

    /// Kernel object of `name`, zero when the scenario does not load it
    fn kernel_object(&self, name: &str) -> u64 {
        self.kernels
            .iter()
            .find(|k| k.name == name)
            .map(|k| k.object)
            .unwrap_or(0)
    }

    /// Raw AQL packet for a dispatch, as it sits in the queue's ring buffer
    pub fn packet_bytes(&self, dispatch: &DispatchSpec) -> Vec<u8> {
        let mut grid_size = [1u32; 3];
        let mut workgroup_size = [1u16; 3];
        for (i, (&grid, &group)) in dispatch.grid.iter().zip(&dispatch.workgroup).enumerate() {
            grid_size[i] = grid;
            workgroup_size[i] = group as u16;
        }

        DispatchPacket {
            header: u16::from(PACKET_TYPE_KERNEL_DISPATCH),
            setup: dispatch.grid.len() as u16,
            workgroup_size,
            grid_size,
            kernel_object: self.kernel_object(&dispatch.kernel),
            ..Default::default()
        }
        .to_bytes()
        .to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernscope_pmc::hsa::{DescriptorMemory, FinalizerMetadata, HsaRuntime};
    use kernscope_pmc::DeviceInfo;

    const DEMO: &str = include_str!("../../demos/fiji.toml");

    #[test]
    fn test_demo_scenario_parses() {
        let scenario = Scenario::parse(DEMO).unwrap();
        assert!(!scenario.devices.is_empty());
        assert!(!scenario.dispatches.is_empty());
    }

    #[test]
    fn test_collaborators_from_scenario() {
        let scenario = Scenario::parse(
            r#"
[[device]]
agent = 1
chip_id = 0x7300
name = "Fiji"
generation = "volcanic-islands"
compute_units = 64

[[device]]
agent = 2
kind = "cpu"

[[kernel]]
name = "saxpy"
object = 0x1000
vgprs = 12

[[dispatch]]
queue = 1
agent = 1
kernel = "saxpy"
grid = [4096]
workgroup = [64]
"#,
        )
        .unwrap();

        let runtime = scenario.runtime();
        assert!(runtime.is_gpu(AgentHandle(1)));
        assert!(!runtime.is_gpu(AgentHandle(2)));
        assert_eq!(scenario.devices().device_name(0x7300, 0).as_deref(), Some("Fiji"));
        assert_eq!(scenario.finalizer().kernel_name(0x1000).as_deref(), Some("saxpy"));
        assert_eq!(
            scenario.memory().read_descriptor(0x1000).map(|d| d.workitem_vgpr_count),
            Some(12)
        );

        let packet = DispatchPacket::from_bytes(&scenario.packet_bytes(&scenario.dispatches[0])).unwrap();
        assert_eq!(packet.work_dim(), 1);
        assert_eq!(packet.grid_size, [4096, 1, 1]);
        assert_eq!(packet.work_group_size(), [64, 1, 1]);
        assert_eq!(packet.kernel_object, 0x1000);
    }

    #[test]
    fn test_rejects_unknown_agent() {
        let err = Scenario::parse(
            r#"
[[dispatch]]
queue = 1
agent = 9
kernel = "k"
grid = [1]
workgroup = [1]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown agent 9"));
    }

    #[test]
    fn test_rejects_mismatched_dimensions() {
        let result = Scenario::parse(
            r#"
[[device]]
agent = 1

[[dispatch]]
queue = 1
agent = 1
kernel = "k"
grid = [64, 64]
workgroup = [8]
"#,
        );
        assert!(result.is_err());
    }
}
