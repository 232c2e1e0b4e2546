//! Per-dispatch GPU performance counter capture
//!
//! Brackets every intercepted kernel dispatch with a hardware counter
//! session, retires sessions once the GPU has finished them, and writes one
//! result row per dispatch.
//!
//! The vendor pieces (counter library, runtime queries, device tables,
//! occupancy arithmetic) are traits; [`sim`] provides in-process versions.

pub mod config;
pub mod context;
pub mod device;
pub mod emit;
pub mod engine;
pub mod error;
pub mod extract;
pub mod header;
pub mod hsa;
pub mod manager;
pub mod metrics;
pub mod occupancy;
pub mod output;
pub mod poller;
pub mod registry;
pub mod sim;

pub use config::ProfilerConfig;
pub use device::{DeviceInfo, DeviceTable, HwGeneration};
pub use engine::{ContextDescriptor, CounterEngine, SessionId};
pub use error::{EngineError, ExtractError, ProfilerError, RuntimeError};
pub use hsa::{AgentHandle, DeviceKind, FinalizerInfo, FinalizerMetadata, HsaRuntime, Queue, SignalHandle};
pub use manager::{Admission, Collaborators, SessionManager, SkipReason};
pub use occupancy::{OccupancyCalculator, OccupancyEntry, OccupancyLog};
pub use output::{DelimitedWriter, MemoryWriter, ResultRow, ResultWriter};
pub use registry::{Session, SessionRegistry};
