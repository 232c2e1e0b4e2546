//! Session manager
//!
//! Owns the counter engine and every piece of process-wide capture state.
//! Interception calls `begin` before a kernel dispatch is submitted and
//! `end` right after; the GPU finishes the work later, and the session is
//! retired by the completion poller (see `poller.rs`) the next time a
//! dispatch needs the context or when the process drains at shutdown.
//!
//! A dispatch moves through `Idle → Admitted → Open → Closed → Retired`:
//! admitted once it holds the context lease, open while the engine brackets
//! it, closed (pending) after `end`, retired once its samples are written.

use crate::config::ProfilerConfig;
use crate::context::ContextSlot;
use crate::device::DeviceInfo;
use crate::engine::{ContextDescriptor, CounterEngine, SessionId};
use crate::error::ProfilerError;
use crate::extract::Extractor;
use crate::header;
use crate::hsa::{AgentHandle, DescriptorMemory, FinalizerMetadata, HsaRuntime, Queue, SignalHandle};
use crate::metrics::{ADMISSION_FAILURES, PENDING_SESSIONS, SESSIONS_BEGUN};
use crate::occupancy::{self, OccupancyCalculator};
use crate::output::ResultWriter;
use crate::registry::{Session, SessionRegistry};
use anyhow::{Context, Result};
use kernscope_shared::utils::thread::current_thread_id;
use kernscope_shared::{DispatchPacket, KernelLaunchRecord, UNKNOWN_DEVICE_NAME};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Only single-pass counter configurations can be captured per dispatch
pub const MAX_PASSES: u32 = 1;

/// Everything the manager talks to
pub struct Collaborators {
    pub engine: Box<dyn CounterEngine>,
    pub runtime: Arc<dyn HsaRuntime>,
    pub memory: Arc<dyn DescriptorMemory>,
    pub finalizer: Arc<dyn FinalizerMetadata>,
    pub devices: Arc<dyn DeviceInfo>,
    pub writer: Box<dyn ResultWriter>,
    pub occupancy: Option<Arc<dyn OccupancyCalculator>>,
}

/// Outcome of a successful `begin`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Captured(SessionId),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonGpuAgent,
    ProfilingDisabled,
    KernelLimitReached,
}

pub struct SessionManager {
    pub(crate) config: ProfilerConfig,
    engine: Mutex<Box<dyn CounterEngine>>,
    pub(crate) runtime: Arc<dyn HsaRuntime>,
    memory: Arc<dyn DescriptorMemory>,
    finalizer: Arc<dyn FinalizerMetadata>,
    devices: Arc<dyn DeviceInfo>,
    writer: Mutex<Box<dyn ResultWriter>>,
    occupancy: Option<Arc<dyn OccupancyCalculator>>,
    registry: Mutex<SessionRegistry>,
    pub(crate) context: ContextSlot,
    init_lock: Mutex<()>,
    engine_ready: AtomicBool,
    profiling_enabled: AtomicBool,
    pub(crate) execution_order: AtomicU64,
    admitted: AtomicU64,
}

impl SessionManager {
    pub fn new(config: ProfilerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            engine,
            runtime,
            memory,
            finalizer,
            devices,
            writer,
            occupancy,
        } = collaborators;

        Self {
            profiling_enabled: AtomicBool::new(!config.start_disabled),
            config,
            engine: Mutex::new(engine),
            runtime,
            memory,
            finalizer,
            devices,
            writer: Mutex::new(writer),
            occupancy,
            registry: Mutex::new(SessionRegistry::new()),
            context: ContextSlot::new(),
            init_lock: Mutex::new(()),
            engine_ready: AtomicBool::new(false),
            execution_order: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
        }
    }

    pub(crate) fn engine(&self) -> MutexGuard<'_, Box<dyn CounterEngine>> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, SessionRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn writer(&self) -> MutexGuard<'_, Box<dyn ResultWriter>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Initialize the counter engine and write the result header.
    ///
    /// Enables the counters selected by the counter file, or every
    /// single-pass counter of the GPU agents when the file selects none.
    /// Calling it again after success does nothing.
    pub fn init(&self) -> Result<()> {
        let _guard = self.init_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_ready() {
            return Ok(());
        }

        let mut engine = self.engine();
        let mut enabled = engine
            .initialize(self.config.counter_file.as_deref(), MAX_PASSES)
            .context("Failed to initialize counter engine")?;

        if enabled.is_empty() {
            enabled = self.default_counters(&mut **engine)?;
            engine
                .set_enabled_counters(&enabled)
                .context("Failed to enable default counters")?;
        }

        let mut columns = header::base_columns();
        columns.extend(enabled.iter().cloned());

        let application = header::application_path();
        let mut writer = self.writer();
        writer.write_header(&header::header_lines(
            &self.config,
            &application.display().to_string(),
        ))?;
        writer.set_columns(&columns)?;

        self.engine_ready.store(true, Ordering::SeqCst);
        info!("Counter capture ready with {} counters", enabled.len());
        Ok(())
    }

    /// Single-pass counters of every GPU agent, first occurrence wins
    fn default_counters(&self, engine: &mut dyn CounterEngine) -> Result<Vec<String>> {
        let agents = self
            .runtime
            .agents()
            .context("Failed to enumerate runtime agents")?;

        let mut seen = HashSet::new();
        let mut counters = Vec::new();
        for agent in agents.into_iter().filter(|a| self.runtime.is_gpu(*a)) {
            let chip_id = match self.runtime.chip_id(agent) {
                Ok(chip_id) => chip_id,
                Err(e) => {
                    warn!("Skipping agent {}: {}", agent, e);
                    continue;
                }
            };

            // TODO: pass the real revision once the runtime reports it
            let available = engine
                .available_counters(chip_id, 0, MAX_PASSES)
                .with_context(|| format!("Failed to list counters for chip {:#x}", chip_id))?;
            for name in available {
                if seen.insert(name.clone()) {
                    counters.push(name);
                }
            }
        }

        debug!("Enabling {} default counters", counters.len());
        Ok(counters)
    }

    pub fn is_ready(&self) -> bool {
        self.engine_ready.load(Ordering::SeqCst)
    }

    pub fn set_profiling_enabled(&self, enabled: bool) {
        info!(
            "Counter capture {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.profiling_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_profiling_enabled(&self) -> bool {
        self.profiling_enabled.load(Ordering::SeqCst)
    }

    /// Dispatches admitted for capture so far
    pub fn admitted_count(&self) -> u64 {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Result rows emitted so far
    pub fn execution_count(&self) -> u64 {
        self.execution_order.load(Ordering::SeqCst)
    }

    /// Queues whose last session has not been retired yet
    pub fn pending_queue_ids(&self) -> Vec<u64> {
        self.registry().queue_ids()
    }

    /// Whether a dispatch currently holds the counter context
    pub fn is_context_held(&self) -> bool {
        self.context.is_held()
    }

    pub fn pending_session(&self, queue_id: u64) -> Option<Session> {
        self.registry().find(queue_id).cloned()
    }

    pub fn flush(&self) -> Result<()> {
        self.writer().flush()
    }

    fn capture_blocked(&self) -> Option<SkipReason> {
        if !self.is_profiling_enabled() {
            Some(SkipReason::ProfilingDisabled)
        } else if self.admitted_count() >= self.config.max_kernels {
            Some(SkipReason::KernelLimitReached)
        } else {
            None
        }
    }

    fn device_name(&self, agent: AgentHandle) -> String {
        let chip_id = match self.runtime.chip_id(agent) {
            Ok(chip_id) => chip_id,
            Err(e) => {
                warn!("{}", e);
                return UNKNOWN_DEVICE_NAME.to_string();
            }
        };

        // TODO: pass the real revision once the runtime reports it
        self.devices.device_name(chip_id, 0).unwrap_or_else(|| {
            debug!("No device entry for chip {:#x}", chip_id);
            UNKNOWN_DEVICE_NAME.to_string()
        })
    }

    fn launch_record(&self, packet: Option<&DispatchPacket>, device_name: &str) -> KernelLaunchRecord {
        let extractor = Extractor {
            finalizer: &*self.finalizer,
            memory: &*self.memory,
            runtime: &*self.runtime,
        };

        extractor.extract(packet, device_name).unwrap_or_else(|e| {
            warn!("Using placeholder launch record: {}", e);
            KernelLaunchRecord::placeholder(device_name, current_thread_id())
        })
    }

    /// Called before a dispatch is submitted. Returns false when the
    /// dispatch could not be captured.
    pub fn begin(
        &self,
        agent: AgentHandle,
        queue: Option<&Queue>,
        packet: Option<&DispatchPacket>,
        translation_handle: u64,
    ) -> bool {
        match self.try_begin(agent, queue, packet, translation_handle) {
            Ok(_) => true,
            Err(e) => {
                ADMISSION_FAILURES.with_label_values(&[e.reason()]).inc();
                warn!("Unable to begin counter capture: {}", e);
                false
            }
        }
    }

    pub fn try_begin(
        &self,
        agent: AgentHandle,
        queue: Option<&Queue>,
        packet: Option<&DispatchPacket>,
        translation_handle: u64,
    ) -> Result<Admission, ProfilerError> {
        let queue = queue.ok_or(ProfilerError::MissingQueue)?;
        let device_name = self.device_name(agent);
        let record = self.launch_record(packet, &device_name);

        if !self.runtime.is_gpu(agent) {
            return Ok(Admission::Skipped(SkipReason::NonGpuAgent));
        }
        if !self.is_ready() {
            return Err(ProfilerError::EngineNotReady);
        }
        if let Some(reason) = self.capture_blocked() {
            debug!("Skipping {}: {:?}", record.kernel_name, reason);
            return Ok(Admission::Skipped(reason));
        }

        // The previous session on this queue must be retired first
        let pending = self.registry().contains(queue.id);
        if pending {
            self.try_wait_for_completed_session(queue.id, self.config.session_timeout())?;
        }

        let lease = self.context.acquire();
        if let Some(reason) = self.capture_blocked() {
            debug!("Skipping {}: {:?}", record.kernel_name, reason);
            return Ok(Admission::Skipped(reason));
        }
        self.retire_open_context(self.config.session_timeout())?;

        let session = {
            let mut engine = self.engine();
            let descriptor = ContextDescriptor {
                agent,
                queue_id: queue.id,
                translation_handle,
            };
            let id = start_capture(&mut **engine, &descriptor)?;

            let session = Session {
                id,
                queue_id: queue.id,
                record,
                device_name,
            };
            let inserted = self.registry().try_insert(queue.id, session.clone());
            if !inserted {
                close_context(&mut **engine);
                return Err(ProfilerError::SlotOccupied(queue.id));
            }
            lease.mark_open(queue.id, id);
            session
        };
        lease.commit(queue.id);

        self.admitted.fetch_add(1, Ordering::SeqCst);
        SESSIONS_BEGUN.inc();
        PENDING_SESSIONS.inc();
        debug!(
            "Session {} began for {} on queue {}",
            session.id, session.record.kernel_name, queue.id
        );

        if self.config.kernel_occupancy {
            if let Err(e) = self.submit_occupancy(agent, &session) {
                error!("Unable to add occupancy data: {}", e);
            }
        }

        Ok(Admission::Captured(session.id))
    }

    /// Called after a dispatch is submitted. Closes the bracketing opened by
    /// `begin` and hands the context back; the session stays pending until
    /// the GPU finishes.
    pub fn end(
        &self,
        agent: AgentHandle,
        queue: Option<&Queue>,
        translation_handle: u64,
        signal: SignalHandle,
    ) -> bool {
        match self.try_end(agent, queue, translation_handle, signal) {
            Ok(()) => true,
            Err(e) => {
                warn!("Unable to end counter capture: {}", e);
                false
            }
        }
    }

    pub fn try_end(
        &self,
        agent: AgentHandle,
        queue: Option<&Queue>,
        _translation_handle: u64,
        _signal: SignalHandle,
    ) -> Result<(), ProfilerError> {
        if !self.runtime.is_gpu(agent) {
            return Ok(());
        }
        if !self.is_ready() {
            return Err(ProfilerError::EngineNotReady);
        }
        let queue = queue.ok_or(ProfilerError::MissingQueue)?;

        if !self.context.is_held_by(queue.id) {
            // `begin` skipped this dispatch, or another thread's dispatch on
            // the same queue holds the context
            if self.capture_blocked().is_some() {
                return Ok(());
            }
            return Err(ProfilerError::NoActiveCapture(queue.id));
        }

        let results = {
            let mut engine = self.engine();
            [engine.end_sample(), engine.end_pass(), engine.end_session()]
        };
        self.context.release(queue.id);

        for result in results {
            result?;
        }
        Ok(())
    }

    fn submit_occupancy(&self, agent: AgentHandle, session: &Session) -> Result<(), ProfilerError> {
        let calculator = match &self.occupancy {
            Some(calculator) => calculator,
            None => return Ok(()),
        };

        let compute_units = match self.runtime.compute_unit_count(agent) {
            Ok(count) => Some(count),
            Err(e) => {
                error!("Unable to get compute unit count: {}", e);
                None
            }
        };

        let entry = occupancy::build_entry(
            &session.record,
            &session.device_name,
            compute_units,
            &*self.devices,
        )?;
        calculator
            .add_entry(entry)
            .map_err(|e| ProfilerError::Occupancy(format!("{:#}", e)))?;

        if compute_units.is_none() {
            return Err(ProfilerError::Occupancy(
                "entry recorded without compute unit count".to_string(),
            ));
        }
        Ok(())
    }
}

/// Open the context and bracket one single-pass sample. Closes the context
/// again if any step after opening fails.
fn start_capture(
    engine: &mut dyn CounterEngine,
    descriptor: &ContextDescriptor,
) -> Result<SessionId, ProfilerError> {
    engine.open(descriptor)?;

    let started = begin_single_pass(engine);
    if started.is_err() {
        close_context(engine);
    }
    started
}

fn begin_single_pass(engine: &mut dyn CounterEngine) -> Result<SessionId, ProfilerError> {
    engine.enable_counters()?;
    let session = engine.begin_session()?;

    let passes = engine.pass_count()?;
    if passes != MAX_PASSES {
        return Err(ProfilerError::MultiPassNotSupported(passes));
    }

    engine.begin_pass()?;
    engine.begin_sample(0)?;
    Ok(session)
}

pub(crate) fn close_context(engine: &mut dyn CounterEngine) {
    if let Err(e) = engine.close() {
        warn!("Unable to close counter context: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceTable, HwGeneration};
    use crate::hsa::{DeviceKind, FinalizerInfo};
    use crate::occupancy::OccupancyLog;
    use crate::output::MemoryWriter;
    use crate::sim::{EngineCall, SimAgent, SimCounter, SimEngine, SimMemory, SimRuntime};
    use kernscope_shared::{CounterType, KernelCodeDescriptor};

    const GPU: AgentHandle = AgentHandle(1);
    const CPU: AgentHandle = AgentHandle(2);
    const KERNEL_OBJECT: u64 = 0x4000;

    struct Harness {
        manager: SessionManager,
        engine: SimEngine,
        writer: MemoryWriter,
        occupancy: Arc<OccupancyLog>,
    }

    fn harness(config: ProfilerConfig, engine: SimEngine) -> Harness {
        let runtime = SimRuntime::new()
            .with_agent(GPU, SimAgent::new(DeviceKind::Gpu, 0x7300).with_compute_units(64))
            .with_agent(CPU, SimAgent::new(DeviceKind::Cpu, 0));
        let memory = SimMemory::new().with_descriptor(
            KERNEL_OBJECT,
            KernelCodeDescriptor {
                workitem_vgpr_count: 24,
                wavefront_sgpr_count: 16,
                ..Default::default()
            },
        );
        let finalizer = FinalizerInfo::new();
        finalizer.record_code_symbol(KERNEL_OBJECT, 1);
        finalizer.record_symbol_name(1, "reduce");

        let writer = MemoryWriter::new();
        let occupancy = Arc::new(OccupancyLog::new());
        let manager = SessionManager::new(
            config,
            Collaborators {
                engine: Box::new(engine.clone()),
                runtime: Arc::new(runtime),
                memory: Arc::new(memory),
                finalizer: Arc::new(finalizer),
                devices: Arc::new(
                    DeviceTable::new().with_device(0x7300, "Fiji", HwGeneration::VolcanicIslands),
                ),
                writer: Box::new(writer.clone()),
                occupancy: Some(occupancy.clone()),
            },
        );

        Harness {
            manager,
            engine,
            writer,
            occupancy,
        }
    }

    fn engine() -> SimEngine {
        SimEngine::new()
            .with_counter(SimCounter::new("Wavefronts", CounterType::Uint64, 64.0))
            .with_counter(SimCounter::new("VALUBusy", CounterType::Float32, 12.5))
            .with_device_counters(0x7300, &["Wavefronts", "VALUBusy"])
    }

    fn packet() -> DispatchPacket {
        DispatchPacket {
            setup: 1,
            workgroup_size: [64, 1, 1],
            grid_size: [4096, 1, 1],
            kernel_object: KERNEL_OBJECT,
            ..Default::default()
        }
    }

    #[test]
    fn test_init_enables_default_counters() {
        let h = harness(ProfilerConfig::default(), engine());
        h.manager.init().unwrap();
        h.manager.init().unwrap();

        assert_eq!(h.engine.count(EngineCall::Initialize), 1);
        assert_eq!(h.engine.enabled_names(), vec!["Wavefronts", "VALUBusy"]);
        let columns = h.writer.columns();
        assert_eq!(columns.len(), 10);
        assert_eq!(&columns[8..], ["Wavefronts", "VALUBusy"]);
        assert!(h.writer.header().contains(&"API=HSA".to_string()));
    }

    #[test]
    fn test_init_keeps_counter_file_selection() {
        let h = harness(
            ProfilerConfig::default(),
            engine().with_selected(&["VALUBusy"]),
        );
        h.manager.init().unwrap();

        assert_eq!(h.engine.count(EngineCall::AvailableCounters), 0);
        assert_eq!(h.writer.columns().last().map(String::as_str), Some("VALUBusy"));
    }

    #[test]
    fn test_begin_before_init_fails() {
        let h = harness(ProfilerConfig::default(), engine());
        let queue = Queue { id: 1 };

        assert!(matches!(
            h.manager.try_begin(GPU, Some(&queue), Some(&packet()), 0),
            Err(ProfilerError::EngineNotReady)
        ));
        assert!(!h.manager.end(GPU, Some(&queue), 0, SignalHandle(0)));
    }

    #[test]
    fn test_missing_queue_rejected() {
        let h = harness(ProfilerConfig::default(), engine());
        h.manager.init().unwrap();

        assert!(!h.manager.begin(GPU, None, Some(&packet()), 0));
        assert_eq!(h.engine.count(EngineCall::Open), 0);
    }

    #[test]
    fn test_cpu_agent_not_captured() {
        let h = harness(ProfilerConfig::default(), engine());
        h.manager.init().unwrap();
        let queue = Queue { id: 1 };

        assert_eq!(
            h.manager.try_begin(CPU, Some(&queue), Some(&packet()), 0).unwrap(),
            Admission::Skipped(SkipReason::NonGpuAgent)
        );
        assert!(h.manager.end(CPU, Some(&queue), 0, SignalHandle(0)));
        assert_eq!(h.engine.count(EngineCall::Open), 0);
    }

    #[test]
    fn test_capture_lifecycle() {
        let h = harness(
            ProfilerConfig {
                kernel_occupancy: true,
                ..Default::default()
            },
            engine(),
        );
        h.manager.init().unwrap();
        let queue = Queue { id: 7 };

        let admission = h.manager.try_begin(GPU, Some(&queue), Some(&packet()), 0).unwrap();
        assert!(matches!(admission, Admission::Captured(_)));
        assert!(h.manager.context.is_held());
        assert_eq!(h.manager.pending_queue_ids(), vec![7]);

        assert!(h.manager.end(GPU, Some(&queue), 0, SignalHandle(0)));
        assert!(!h.manager.context.is_held());
        // Still pending until the poller retires it
        assert_eq!(h.manager.pending_queue_ids(), vec![7]);
        assert!(h.engine.is_open());

        let session = h.manager.pending_session(7).unwrap();
        assert_eq!(session.record.kernel_name, "reduce_Fiji");
        assert_eq!(session.device_name, "Fiji");

        let occupancy = h.occupancy.entries();
        assert_eq!(occupancy.len(), 1);
        assert_eq!(occupancy[0].compute_units, Some(64));
        assert_eq!(occupancy[0].work_group_item_count, 64);
    }

    #[test]
    fn test_disabled_and_limit_skip_capture() {
        let h = harness(
            ProfilerConfig {
                start_disabled: true,
                max_kernels: 1,
                ..Default::default()
            },
            engine(),
        );
        h.manager.init().unwrap();
        let queue = Queue { id: 1 };

        assert_eq!(
            h.manager.try_begin(GPU, Some(&queue), Some(&packet()), 0).unwrap(),
            Admission::Skipped(SkipReason::ProfilingDisabled)
        );
        assert!(h.manager.end(GPU, Some(&queue), 0, SignalHandle(0)));

        h.manager.set_profiling_enabled(true);
        assert!(h.manager.begin(GPU, Some(&queue), Some(&packet()), 0));
        assert!(h.manager.end(GPU, Some(&queue), 0, SignalHandle(0)));

        assert_eq!(
            h.manager.try_begin(GPU, Some(&queue), Some(&packet()), 0).unwrap(),
            Admission::Skipped(SkipReason::KernelLimitReached)
        );
        assert_eq!(h.manager.admitted_count(), 1);
    }

    #[test]
    fn test_end_without_capture() {
        let h = harness(ProfilerConfig::default(), engine());
        h.manager.init().unwrap();

        assert!(matches!(
            h.manager.try_end(GPU, Some(&Queue { id: 3 }), 0, SignalHandle(0)),
            Err(ProfilerError::NoActiveCapture(3))
        ));
    }

    #[test]
    fn test_end_reports_failure_and_releases() {
        let h = harness(ProfilerConfig::default(), engine());
        h.manager.init().unwrap();
        let queue = Queue { id: 2 };

        assert!(h.manager.begin(GPU, Some(&queue), Some(&packet()), 0));
        h.engine.fail_on(EngineCall::EndPass);

        assert!(!h.manager.end(GPU, Some(&queue), 0, SignalHandle(0)));
        assert!(!h.manager.context.is_held());
        // All three bracketing calls were still made
        assert_eq!(h.engine.count(EngineCall::EndSession), 1);
    }

    #[test]
    fn test_placeholder_record_on_bad_packet() {
        let h = harness(ProfilerConfig::default(), engine());
        h.manager.init().unwrap();
        let queue = Queue { id: 4 };

        assert!(h.manager.begin(GPU, Some(&queue), None, 0));
        let session = h.manager.pending_session(4).unwrap();
        assert_eq!(session.record.kernel_name, "<UnknownKernelName>_Fiji");
        assert_eq!(session.record.usage.vgprs, None);
        assert!(h.manager.end(GPU, Some(&queue), 0, SignalHandle(0)));
    }
}
