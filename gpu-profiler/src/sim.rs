//! Simulated runtime and counter engine
//!
//! Stand-ins for the vendor runtime and counter library, used by the replay
//! command and the tests. The engine enforces the same single-context rule
//! as the hardware, records every call, and can be told to fail any call.

use crate::engine::{ContextDescriptor, CounterEngine, SessionId};
use crate::error::{EngineError, RuntimeError};
use crate::hsa::{AgentHandle, DescriptorMemory, DeviceKind, HsaRuntime};
use kernscope_shared::{CounterType, CounterValue, KernelCodeDescriptor};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Engine entry points, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCall {
    Initialize,
    AvailableCounters,
    SetEnabledCounters,
    Open,
    EnableCounters,
    Close,
    BeginSession,
    PassCount,
    BeginPass,
    BeginSample,
    EndSample,
    EndPass,
    EndSession,
    IsSessionReady,
    SampleCount,
    EnabledCount,
    EnabledIndex,
    CounterName,
    CounterDataType,
    SampleValue,
}

impl EngineCall {
    pub fn name(self) -> &'static str {
        match self {
            EngineCall::Initialize => "initialize",
            EngineCall::AvailableCounters => "available_counters",
            EngineCall::SetEnabledCounters => "set_enabled_counters",
            EngineCall::Open => "open",
            EngineCall::EnableCounters => "enable_counters",
            EngineCall::Close => "close",
            EngineCall::BeginSession => "begin_session",
            EngineCall::PassCount => "pass_count",
            EngineCall::BeginPass => "begin_pass",
            EngineCall::BeginSample => "begin_sample",
            EngineCall::EndSample => "end_sample",
            EngineCall::EndPass => "end_pass",
            EngineCall::EndSession => "end_session",
            EngineCall::IsSessionReady => "is_session_ready",
            EngineCall::SampleCount => "sample_count",
            EngineCall::EnabledCount => "enabled_count",
            EngineCall::EnabledIndex => "enabled_index",
            EngineCall::CounterName => "counter_name",
            EngineCall::CounterDataType => "counter_data_type",
            EngineCall::SampleValue => "sample_value",
        }
    }
}

/// A counter the simulated engine knows about
#[derive(Debug, Clone, PartialEq)]
pub struct SimCounter {
    pub name: String,
    pub type_code: u32,

    /// Reading reported for every sample
    pub value: f64,
}

impl SimCounter {
    pub fn new(name: impl Into<String>, kind: CounterType, value: f64) -> Self {
        Self::with_raw_type(name, kind.code(), value)
    }

    /// Counter with an arbitrary type code, including ones emission rejects
    pub fn with_raw_type(name: impl Into<String>, type_code: u32, value: f64) -> Self {
        Self {
            name: name.into(),
            type_code,
            value,
        }
    }
}

#[derive(Debug, Default)]
struct SimSession {
    polls: u32,
    samples: u32,
    ended: bool,
}

#[derive(Debug)]
struct SimState {
    counters: Vec<SimCounter>,
    selected: Vec<String>,
    device_counters: HashMap<u32, Vec<String>>,
    enabled: Vec<u32>,
    pass_count: u32,
    ready_after_polls: Option<u32>,
    open: Option<ContextDescriptor>,
    next_session: SessionId,
    current: Option<SessionId>,
    sessions: HashMap<SessionId, SimSession>,
    faults: HashSet<EngineCall>,
    log_calls: bool,
    calls: Vec<EngineCall>,
    counts: HashMap<EngineCall, usize>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            counters: Vec::new(),
            selected: Vec::new(),
            device_counters: HashMap::new(),
            enabled: Vec::new(),
            pass_count: 1,
            ready_after_polls: Some(1),
            open: None,
            next_session: 0,
            current: None,
            sessions: HashMap::new(),
            faults: HashSet::new(),
            log_calls: true,
            calls: Vec::new(),
            counts: HashMap::new(),
        }
    }
}

impl SimState {
    /// Log `call` and fail it if a fault is injected
    fn enter(&mut self, call: EngineCall) -> Result<(), EngineError> {
        *self.counts.entry(call).or_insert(0) += 1;
        if self.log_calls {
            self.calls.push(call);
        }
        if self.faults.contains(&call) {
            return Err(EngineError::Status {
                call: call.name(),
                status: -1,
            });
        }
        Ok(())
    }

    fn require_open(&self) -> Result<(), EngineError> {
        match self.open {
            Some(_) => Ok(()),
            None => Err(EngineError::NotOpen),
        }
    }

    fn current_session(&mut self) -> Result<&mut SimSession, EngineError> {
        let id = self.current.ok_or(EngineError::NotOpen)?;
        self.sessions
            .get_mut(&id)
            .ok_or(EngineError::UnknownSession(id))
    }

    fn counter(&self, index: u32) -> Result<&SimCounter, EngineError> {
        self.counters
            .get(index as usize)
            .ok_or(EngineError::CounterIndex(index))
    }

    fn index_of(&self, name: &str) -> Option<u32> {
        self.counters
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as u32)
    }
}

/// In-process counter engine. Clones share state, so a test can keep a
/// handle while the session manager owns the engine.
#[derive(Debug, Clone, Default)]
pub struct SimEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_counter(self, counter: SimCounter) -> Self {
        self.state().counters.push(counter);
        self
    }

    /// Counters the counter file selects; returned by `initialize`
    pub fn with_selected(self, names: &[&str]) -> Self {
        self.state().selected = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Single-pass counters reported for a chip id
    pub fn with_device_counters(self, chip_id: u32, names: &[&str]) -> Self {
        self.state()
            .device_counters
            .insert(chip_id, names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_pass_count(self, passes: u32) -> Self {
        self.state().pass_count = passes;
        self
    }

    /// Sessions report ready on the `polls`th readiness check after they end
    pub fn ready_after_polls(self, polls: u32) -> Self {
        self.state().ready_after_polls = Some(polls);
        self
    }

    pub fn never_ready(self) -> Self {
        self.state().ready_after_polls = None;
        self
    }

    /// Count calls without keeping them in order. Long replays use this so
    /// memory stays flat.
    pub fn without_call_log(self) -> Self {
        {
            let mut state = self.state();
            state.log_calls = false;
            state.calls = Vec::new();
        }
        self
    }

    pub fn fail_on(&self, call: EngineCall) {
        self.state().faults.insert(call);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Every call in order; empty when the call log is off
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: EngineCall) -> usize {
        self.state().counts.get(&call).copied().unwrap_or(0)
    }

    pub fn is_open(&self) -> bool {
        self.state().open.is_some()
    }

    pub fn open_context(&self) -> Option<ContextDescriptor> {
        self.state().open
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let state = self.state();
        state
            .enabled
            .iter()
            .filter_map(|i| state.counters.get(*i as usize))
            .map(|c| c.name.clone())
            .collect()
    }
}

impl CounterEngine for SimEngine {
    fn initialize(
        &mut self,
        _counter_file: Option<&Path>,
        _max_passes: u32,
    ) -> Result<Vec<String>, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::Initialize)?;

        let selected = state.selected.clone();
        let enabled: Vec<u32> = selected.iter().filter_map(|n| state.index_of(n)).collect();
        state.enabled = enabled;
        Ok(selected)
    }

    fn available_counters(
        &mut self,
        device_id: u32,
        _revision_id: u32,
        _max_passes: u32,
    ) -> Result<Vec<String>, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::AvailableCounters)?;

        Ok(match state.device_counters.get(&device_id) {
            Some(names) => names.clone(),
            None => state.counters.iter().map(|c| c.name.clone()).collect(),
        })
    }

    fn set_enabled_counters(&mut self, names: &[String]) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::SetEnabledCounters)?;

        let mut enabled = Vec::with_capacity(names.len());
        for name in names {
            match state.index_of(name) {
                Some(index) => enabled.push(index),
                None => {
                    return Err(EngineError::Status {
                        call: EngineCall::SetEnabledCounters.name(),
                        status: -2,
                    })
                }
            }
        }
        state.enabled = enabled;
        Ok(())
    }

    fn open(&mut self, context: &ContextDescriptor) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::Open)?;
        if state.open.is_some() {
            return Err(EngineError::AlreadyOpen);
        }
        state.open = Some(*context);
        Ok(())
    }

    fn enable_counters(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::EnableCounters)?;
        state.require_open()
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::Close)?;
        state.require_open()?;
        state.open = None;
        state.current = None;
        Ok(())
    }

    fn begin_session(&mut self) -> Result<SessionId, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::BeginSession)?;
        state.require_open()?;

        state.next_session += 1;
        let id = state.next_session;
        state.sessions.insert(id, SimSession::default());
        state.current = Some(id);
        Ok(id)
    }

    fn pass_count(&mut self) -> Result<u32, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::PassCount)?;
        state.current_session()?;
        Ok(state.pass_count)
    }

    fn begin_pass(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::BeginPass)?;
        state.current_session().map(|_| ())
    }

    fn begin_sample(&mut self, _sample_id: u32) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::BeginSample)?;
        state.current_session()?.samples += 1;
        Ok(())
    }

    fn end_sample(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::EndSample)?;
        state.current_session().map(|_| ())
    }

    fn end_pass(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::EndPass)?;
        state.current_session().map(|_| ())
    }

    fn end_session(&mut self) -> Result<(), EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::EndSession)?;
        state.current_session()?.ended = true;
        state.current = None;
        Ok(())
    }

    fn is_session_ready(&mut self, session: SessionId) -> Result<bool, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::IsSessionReady)?;

        let ready_after = state.ready_after_polls;
        let entry = state
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        if !entry.ended {
            return Ok(false);
        }
        entry.polls += 1;
        Ok(ready_after.map_or(false, |n| entry.polls >= n))
    }

    fn sample_count(&mut self, session: SessionId) -> Result<u32, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::SampleCount)?;
        state
            .sessions
            .get(&session)
            .map(|s| s.samples)
            .ok_or(EngineError::UnknownSession(session))
    }

    fn enabled_count(&mut self) -> Result<u32, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::EnabledCount)?;
        Ok(state.enabled.len() as u32)
    }

    fn enabled_index(&mut self, n: u32) -> Result<u32, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::EnabledIndex)?;
        state
            .enabled
            .get(n as usize)
            .copied()
            .ok_or(EngineError::CounterIndex(n))
    }

    fn counter_name(&mut self, index: u32) -> Result<String, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::CounterName)?;
        state.counter(index).map(|c| c.name.clone())
    }

    fn counter_data_type(&mut self, index: u32) -> Result<u32, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::CounterDataType)?;
        state.counter(index).map(|c| c.type_code)
    }

    fn sample_value(
        &mut self,
        session: SessionId,
        sample: u32,
        index: u32,
        kind: CounterType,
    ) -> Result<CounterValue, EngineError> {
        let mut state = self.state();
        state.enter(EngineCall::SampleValue)?;

        let samples = state
            .sessions
            .get(&session)
            .map(|s| s.samples)
            .ok_or(EngineError::UnknownSession(session))?;
        if sample >= samples {
            return Err(EngineError::CounterIndex(sample));
        }
        state
            .counter(index)
            .map(|c| CounterValue::from_f64(kind, c.value))
    }
}

/// One simulated agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimAgent {
    pub kind: DeviceKind,
    pub chip_id: u32,
    pub compute_units: Option<u32>,
}

impl SimAgent {
    pub fn new(kind: DeviceKind, chip_id: u32) -> Self {
        Self {
            kind,
            chip_id,
            compute_units: None,
        }
    }

    pub fn with_compute_units(mut self, count: u32) -> Self {
        self.compute_units = Some(count);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimRuntime {
    agents: BTreeMap<AgentHandle, SimAgent>,
    host_addresses: HashMap<u64, u64>,
}

impl SimRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, handle: AgentHandle, agent: SimAgent) -> Self {
        self.agents.insert(handle, agent);
        self
    }

    /// Map a device code address to the host address of its descriptor
    pub fn with_host_address(mut self, device_address: u64, host_address: u64) -> Self {
        self.host_addresses.insert(device_address, host_address);
        self
    }

    fn agent(&self, handle: AgentHandle, query: &'static str) -> Result<&SimAgent, RuntimeError> {
        self.agents.get(&handle).ok_or(RuntimeError {
            query,
            agent: handle.0,
        })
    }
}

impl HsaRuntime for SimRuntime {
    fn device_kind(&self, agent: AgentHandle) -> Result<DeviceKind, RuntimeError> {
        self.agent(agent, "device_kind").map(|a| a.kind)
    }

    fn chip_id(&self, agent: AgentHandle) -> Result<u32, RuntimeError> {
        self.agent(agent, "chip_id").map(|a| a.chip_id)
    }

    fn compute_unit_count(&self, agent: AgentHandle) -> Result<u32, RuntimeError> {
        self.agent(agent, "compute_unit_count")?
            .compute_units
            .ok_or(RuntimeError {
                query: "compute_unit_count",
                agent: agent.0,
            })
    }

    fn agents(&self) -> Result<Vec<AgentHandle>, RuntimeError> {
        Ok(self.agents.keys().copied().collect())
    }

    fn loaded_code_object_host_address(&self, device_address: u64) -> Option<u64> {
        self.host_addresses.get(&device_address).copied()
    }
}

/// Descriptor memory holding the raw descriptor images a loader would map,
/// decoded on every read
#[derive(Debug, Clone, Default)]
pub struct SimMemory {
    images: HashMap<u64, Vec<u8>>,
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: u64, descriptor: KernelCodeDescriptor) {
        self.insert_image(address, descriptor.to_bytes());
    }

    /// Map raw bytes at `address`, whether or not they form a valid descriptor
    pub fn insert_image(&mut self, address: u64, image: Vec<u8>) {
        self.images.insert(address, image);
    }

    pub fn with_descriptor(mut self, address: u64, descriptor: KernelCodeDescriptor) -> Self {
        self.insert(address, descriptor);
        self
    }
}

impl DescriptorMemory for SimMemory {
    fn read_descriptor(&self, address: u64) -> Option<KernelCodeDescriptor> {
        let image = self.images.get(&address)?;
        match KernelCodeDescriptor::from_bytes(image) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                debug!("Bad descriptor image at {:#x}: {}", address, e);
                None
            }
        }
    }
}
