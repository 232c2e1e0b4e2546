//! Counter collection engine interface
//!
//! The vendor counter library owns a single hardware counter context. The
//! profiler drives it through this trait: open a context for one
//! agent/queue pair, bracket the dispatch with session/pass/sample calls, and
//! read samples back once the engine reports the session ready.

use crate::error::EngineError;
use crate::hsa::AgentHandle;
use kernscope_shared::{CounterType, CounterValue};
use std::path::Path;

/// Session id issued by the engine
pub type SessionId = u32;

/// What a counter context is opened against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextDescriptor {
    pub agent: AgentHandle,
    pub queue_id: u64,

    /// Opaque AQL translation handle passed through from the runtime
    pub translation_handle: u64,
}

pub trait CounterEngine: Send {
    /// Load the counter configuration. Returns the counters enabled from
    /// `counter_file`; an empty list means none were selected.
    fn initialize(
        &mut self,
        counter_file: Option<&Path>,
        max_passes: u32,
    ) -> Result<Vec<String>, EngineError>;

    /// Counters of a device that fit into `max_passes`
    fn available_counters(
        &mut self,
        device_id: u32,
        revision_id: u32,
        max_passes: u32,
    ) -> Result<Vec<String>, EngineError>;

    fn set_enabled_counters(&mut self, names: &[String]) -> Result<(), EngineError>;

    fn open(&mut self, context: &ContextDescriptor) -> Result<(), EngineError>;
    fn enable_counters(&mut self) -> Result<(), EngineError>;
    fn close(&mut self) -> Result<(), EngineError>;

    fn begin_session(&mut self) -> Result<SessionId, EngineError>;
    fn pass_count(&mut self) -> Result<u32, EngineError>;
    fn begin_pass(&mut self) -> Result<(), EngineError>;
    fn begin_sample(&mut self, sample_id: u32) -> Result<(), EngineError>;
    fn end_sample(&mut self) -> Result<(), EngineError>;
    fn end_pass(&mut self) -> Result<(), EngineError>;
    fn end_session(&mut self) -> Result<(), EngineError>;

    /// Whether the GPU has finished the work recorded under `session`
    fn is_session_ready(&mut self, session: SessionId) -> Result<bool, EngineError>;

    fn sample_count(&mut self, session: SessionId) -> Result<u32, EngineError>;
    fn enabled_count(&mut self) -> Result<u32, EngineError>;

    /// Counter index of the `n`th enabled counter
    fn enabled_index(&mut self, n: u32) -> Result<u32, EngineError>;
    fn counter_name(&mut self, index: u32) -> Result<String, EngineError>;

    /// Raw data type code, see [`CounterType::from_code`]
    fn counter_data_type(&mut self, index: u32) -> Result<u32, EngineError>;

    fn sample_value(
        &mut self,
        session: SessionId,
        sample: u32,
        index: u32,
        kind: CounterType,
    ) -> Result<CounterValue, EngineError>;
}
