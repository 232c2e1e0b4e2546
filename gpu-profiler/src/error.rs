//! Error types for counter capture

use crate::engine::SessionId;
use std::time::Duration;
use thiserror::Error;

/// A counter engine call reported failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("counter engine call `{call}` failed with status {status}")]
    Status { call: &'static str, status: i32 },

    #[error("a counter context is already open")]
    AlreadyOpen,

    #[error("no counter context is open")]
    NotOpen,

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("counter index {0} out of range")]
    CounterIndex(u32),
}

/// A compute runtime query failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("runtime query `{query}` failed for agent {agent:#x}")]
pub struct RuntimeError {
    pub query: &'static str,
    pub agent: u64,
}

/// Launch metadata could not be extracted from a dispatch
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("dispatch packet missing or has no kernel object")]
    MissingDispatchInfo,

    #[error("no kernel code descriptor for kernel object {kernel_object:#x}")]
    MissingCodeObject { kernel_object: u64 },
}

/// Failures of the session lifecycle
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("dispatch has no queue")]
    MissingQueue,

    #[error("counter engine has not been initialized")]
    EngineNotReady,

    #[error("unknown queue {0}")]
    UnknownQueue(u64),

    #[error("session on queue {queue_id} did not complete within {timeout:?}")]
    SessionTimeout { queue_id: u64, timeout: Duration },

    #[error("counter configuration needs {0} passes, only single-pass collection is supported")]
    MultiPassNotSupported(u32),

    #[error("counter {counter} has unknown data type {code}")]
    UnknownCounterType { counter: String, code: u32 },

    #[error("queue {0} already has a pending session")]
    SlotOccupied(u64),

    #[error("no capture is open for queue {0}")]
    NoActiveCapture(u64),

    #[error("occupancy entry not recorded: {0}")]
    Occupancy(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("result writer failed: {0:#}")]
    Output(anyhow::Error),
}

impl ProfilerError {
    /// Short label used for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            ProfilerError::MissingQueue => "missing_queue",
            ProfilerError::EngineNotReady => "engine_not_ready",
            ProfilerError::UnknownQueue(_) => "unknown_queue",
            ProfilerError::SessionTimeout { .. } => "timeout",
            ProfilerError::MultiPassNotSupported(_) => "multi_pass",
            ProfilerError::UnknownCounterType { .. } => "unknown_counter_type",
            ProfilerError::SlotOccupied(_) => "slot_occupied",
            ProfilerError::NoActiveCapture(_) => "no_active_capture",
            ProfilerError::Occupancy(_) => "occupancy",
            ProfilerError::Engine(_) => "engine",
            ProfilerError::Extract(_) => "extract",
            ProfilerError::Output(_) => "output",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_converts() {
        let err: ProfilerError = EngineError::NotOpen.into();
        assert_eq!(err.reason(), "engine");
        assert_eq!(err.to_string(), "no counter context is open");
    }

    #[test]
    fn test_timeout_message() {
        let err = ProfilerError::SessionTimeout {
            queue_id: 3,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(
            err.to_string(),
            "session on queue 3 did not complete within 2s"
        );
    }
}
