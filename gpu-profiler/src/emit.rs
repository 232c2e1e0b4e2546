//! Result emission
//!
//! One row per retired session: launch metadata followed by every enabled
//! counter of every sample, formatted by the counter's declared type.

use crate::engine::CounterEngine;
use crate::error::ProfilerError;
use crate::manager::SessionManager;
use crate::metrics::ROWS_WRITTEN;
use crate::output::ResultRow;
use crate::registry::Session;
use kernscope_shared::CounterType;
use std::sync::atomic::Ordering;
use tracing::{debug, error, warn};

const NOT_AVAILABLE: &str = "NA";

fn or_na(value: Option<u32>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Build the result row of `session`, numbered `order`.
///
/// Counters whose index, type, name or value cannot be read are left out.
/// A counter with a data type emission does not understand aborts the row.
pub(crate) fn build_row(
    engine: &mut dyn CounterEngine,
    session: &Session,
    order: u64,
) -> Result<ResultRow, ProfilerError> {
    let record = &session.record;
    let [gx, gy, gz] = record.global_work_size;
    let [wx, wy, wz] = record.work_group_size;

    let mut row = ResultRow::new();
    row.push("Method", record.kernel_name.as_str());
    row.push("ExecutionOrder", order.to_string());
    row.push("ThreadID", record.thread_id.to_string());
    row.push("GlobalWorkSize", format!("{{{:>7} {:>7} {:>7}}}", gx, gy, gz));
    row.push("WorkGroupSize", format!("{{{:>5} {:>5} {:>5}}}", wx, wy, wz));
    row.push("LocalMemSize", or_na(record.usage.lds_bytes));
    row.push("VGPRs", or_na(record.usage.vgprs));
    row.push("SGPRs", or_na(record.usage.sgprs));

    let samples = engine.sample_count(session.id).unwrap_or_else(|e| {
        warn!("Unable to get sample count of session {}: {}", session.id, e);
        0
    });

    for sample in 0..samples {
        let enabled = engine.enabled_count().unwrap_or_else(|e| {
            warn!("Unable to get enabled counter count: {}", e);
            0
        });

        for n in 0..enabled {
            let index = match engine.enabled_index(n) {
                Ok(index) => index,
                Err(e) => {
                    debug!("Skipping enabled counter {}: {}", n, e);
                    continue;
                }
            };
            let code = match engine.counter_data_type(index) {
                Ok(code) => code,
                Err(e) => {
                    debug!("Skipping counter {}: {}", index, e);
                    continue;
                }
            };
            let name = match engine.counter_name(index) {
                Ok(name) => name,
                Err(e) => {
                    debug!("Skipping counter {}: {}", index, e);
                    continue;
                }
            };

            let kind = CounterType::from_code(code).ok_or_else(|| {
                ProfilerError::UnknownCounterType {
                    counter: name.clone(),
                    code,
                }
            })?;

            match engine.sample_value(session.id, sample, index, kind) {
                Ok(value) => row.push(name, value.format()),
                Err(e) => debug!("No value for {} in sample {}: {}", name, sample, e),
            }
        }
    }

    Ok(row)
}

impl SessionManager {
    /// Write the result row of a session whose samples are ready
    pub fn emit_result(&self, session: &Session) -> Result<(), ProfilerError> {
        let mut engine = self.engine();
        self.emit_locked(&mut **engine, session)
    }

    /// Emission with the engine lock already held by the caller
    pub(crate) fn emit_locked(
        &self,
        engine: &mut dyn CounterEngine,
        session: &Session,
    ) -> Result<(), ProfilerError> {
        if !self.is_ready() {
            return Err(ProfilerError::EngineNotReady);
        }

        let order = self.execution_order.fetch_add(1, Ordering::SeqCst) + 1;
        let row = build_row(engine, session, order).map_err(|e| {
            error!("Dropping result of {}: {}", session.record.kernel_name, e);
            e
        })?;

        self.writer()
            .write_row(&row)
            .map_err(ProfilerError::Output)?;
        ROWS_WRITTEN.inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{EngineCall, SimCounter, SimEngine};
    use kernscope_shared::{KernelLaunchRecord, ResourceUsage};

    fn session(engine: &mut SimEngine) -> Session {
        engine
            .open(&crate::engine::ContextDescriptor {
                agent: crate::hsa::AgentHandle(1),
                queue_id: 1,
                translation_handle: 0,
            })
            .unwrap();
        engine.enable_counters().unwrap();
        let id = engine.begin_session().unwrap();
        engine.begin_pass().unwrap();
        engine.begin_sample(0).unwrap();
        engine.end_sample().unwrap();
        engine.end_pass().unwrap();
        engine.end_session().unwrap();

        Session {
            id,
            queue_id: 1,
            record: KernelLaunchRecord {
                work_dim: 3,
                work_group_size: [8, 8, 4],
                global_work_size: [1024, 512, 64],
                usage: ResourceUsage {
                    vgprs: Some(32),
                    sgprs: None,
                    lds_bytes: Some(4096),
                },
                ..KernelLaunchRecord::placeholder("Fiji", 77)
            },
            device_name: "Fiji".to_string(),
        }
    }

    fn enabled(engine: SimEngine, names: &[&str]) -> SimEngine {
        let mut engine = engine;
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        engine.set_enabled_counters(&names).unwrap();
        engine
    }

    #[test]
    fn test_row_layout() {
        let mut engine = enabled(
            SimEngine::new()
                .with_counter(SimCounter::new("SQ_WAVES", CounterType::Uint32, 4096.0))
                .with_counter(SimCounter::new("MemUnitBusy", CounterType::Float64, 87.126)),
            &["SQ_WAVES", "MemUnitBusy"],
        );
        let session = session(&mut engine);

        let row = build_row(&mut engine, &session, 3).unwrap();
        assert_eq!(row.get("Method"), Some("<UnknownKernelName>_Fiji"));
        assert_eq!(row.get("ExecutionOrder"), Some("3"));
        assert_eq!(row.get("ThreadID"), Some("77"));
        assert_eq!(row.get("GlobalWorkSize"), Some("{   1024     512      64}"));
        assert_eq!(row.get("WorkGroupSize"), Some("{    8     8     4}"));
        assert_eq!(row.get("LocalMemSize"), Some("4096"));
        assert_eq!(row.get("VGPRs"), Some("32"));
        assert_eq!(row.get("SGPRs"), Some("NA"));
        assert_eq!(row.get("SQ_WAVES"), Some("    4096"));
        assert_eq!(row.get("MemUnitBusy"), Some("       87.13"));
        assert_eq!(row.len(), 10);
    }

    #[test]
    fn test_unreadable_counter_skipped() {
        let mut engine = enabled(
            SimEngine::new()
                .with_counter(SimCounter::new("SQ_WAVES", CounterType::Uint32, 1.0))
                .with_counter(SimCounter::new("GPUTime", CounterType::Uint64, 2.0)),
            &["SQ_WAVES", "GPUTime"],
        );
        let session = session(&mut engine);
        engine.fail_on(EngineCall::SampleValue);

        let row = build_row(&mut engine, &session, 1).unwrap();
        assert_eq!(row.get("SQ_WAVES"), None);
        assert_eq!(row.len(), 8);
    }

    #[test]
    fn test_unknown_counter_type_aborts_row() {
        let mut engine = enabled(
            SimEngine::new()
                .with_counter(SimCounter::new("SQ_WAVES", CounterType::Uint32, 1.0))
                .with_counter(SimCounter::with_raw_type("Odd", 9, 1.0)),
            &["SQ_WAVES", "Odd"],
        );
        let session = session(&mut engine);

        match build_row(&mut engine, &session, 1) {
            Err(ProfilerError::UnknownCounterType { counter, code }) => {
                assert_eq!(counter, "Odd");
                assert_eq!(code, 9);
            }
            other => panic!("expected unknown counter type, got {:?}", other),
        }
    }
}
