//! HSA runtime integration
//!
//! Handles and queries for the compute runtime the profiler intercepts, plus
//! the finalizer's code-object symbol tables.

pub mod finalizer;
pub mod runtime;

pub use finalizer::{FinalizerInfo, FinalizerMetadata};
pub use runtime::{
    AgentHandle, DescriptorMemory, DeviceKind, HsaRuntime, Queue, SignalHandle,
};
