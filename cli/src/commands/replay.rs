//! Replay command implementation

use crate::output;
use crate::scenario::{DispatchSpec, Scenario};
use anyhow::{Context, Result};
use clap::Args;
use kernscope_pmc::hsa::{AgentHandle, Queue, SignalHandle};
use kernscope_pmc::metrics::encode_metrics;
use kernscope_pmc::occupancy::OccupancyLog;
use kernscope_pmc::output::DelimitedWriter;
use kernscope_pmc::{Collaborators, OccupancyCalculator, ProfilerConfig, SessionManager};
use kernscope_shared::DispatchPacket;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Scenario file (TOML)
    pub scenario: PathBuf,

    /// Result file; defaults to <scenario>.hsa.pmc in the working directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Profiler configuration file (TOML)
    #[arg(short, long, env = "KERNSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Print capture metrics in Prometheus text format after the run
    #[arg(long)]
    pub metrics: bool,

    /// How long to wait for outstanding sessions after the last dispatch
    #[arg(long)]
    pub drain_timeout: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Per-queue dispatch counts
#[derive(Debug, Default, Clone, Copy, Serialize)]
struct QueueStats {
    dispatched: u64,
    begun: u64,
    ended: u64,
    malformed: u64,
}

impl QueueStats {
    fn merge(&mut self, other: QueueStats) {
        self.dispatched += other.dispatched;
        self.begun += other.begun;
        self.ended += other.ended;
        self.malformed += other.malformed;
    }
}

#[derive(Debug, Serialize)]
struct ReplaySummary {
    scenario: PathBuf,
    output: PathBuf,
    occupancy: Option<PathBuf>,
    queues: usize,
    #[serde(flatten)]
    totals: QueueStats,
    admitted: u64,
    rows: u64,
    drained: bool,
}

pub fn run(args: ReplayArgs) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)?;

    let mut config = ProfilerConfig::load(args.config.as_deref())?;
    if let Some(output) = &args.output {
        config.output_file = Some(output.clone());
    }
    let drain_timeout = match &args.drain_timeout {
        Some(value) => kernscope_shared::utils::parse_duration(value)
            .context("Failed to parse drain timeout")?,
        None => config.drain_timeout(),
    };

    let exe_name = args
        .scenario
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scenario".to_string());
    let output_path = config.resolve_output_path(&exe_name);
    let writer = DelimitedWriter::create(&output_path, config.list_separator)?;

    let occupancy = config.kernel_occupancy.then(|| Arc::new(OccupancyLog::new()));

    let manager = SessionManager::new(
        config,
        Collaborators {
            engine: Box::new(scenario.engine()),
            runtime: Arc::new(scenario.runtime()),
            memory: Arc::new(scenario.memory()),
            finalizer: Arc::new(scenario.finalizer()),
            devices: Arc::new(scenario.devices()),
            writer: Box::new(writer),
            occupancy: occupancy
                .clone()
                .map(|log| log as Arc<dyn OccupancyCalculator>),
        },
    );
    manager.init()?;

    info!(
        "Replaying {} dispatches from {}",
        scenario.dispatches.len(),
        args.scenario.display()
    );

    let mut by_queue: BTreeMap<u64, Vec<&DispatchSpec>> = BTreeMap::new();
    for dispatch in &scenario.dispatches {
        by_queue.entry(dispatch.queue).or_default().push(dispatch);
    }

    let mut totals = QueueStats::default();
    thread::scope(|scope| -> Result<()> {
        let mut workers = Vec::new();
        for (&queue_id, dispatches) in &by_queue {
            let manager = &manager;
            let scenario = &scenario;
            let worker = thread::Builder::new()
                .name(format!("queue-{}", queue_id))
                .spawn_scoped(scope, move || {
                    replay_queue(manager, scenario, queue_id, dispatches)
                })
                .context("Failed to spawn queue worker")?;
            workers.push(worker);
        }

        for worker in workers {
            match worker.join() {
                Ok(stats) => totals.merge(stats),
                Err(_) => anyhow::bail!("Queue worker panicked"),
            }
        }
        Ok(())
    })?;

    let drained = manager.wait_for_completed_sessions(drain_timeout);
    if !drained {
        warn!(
            "Sessions still pending on queues {:?} after {:?}",
            manager.pending_queue_ids(),
            drain_timeout
        );
    }
    manager.flush()?;

    let occupancy_path = match &occupancy {
        Some(log) => Some(write_occupancy(&output_path, log)?),
        None => None,
    };

    let summary = ReplaySummary {
        scenario: args.scenario.clone(),
        output: output_path,
        occupancy: occupancy_path,
        queues: by_queue.len(),
        totals,
        admitted: manager.admitted_count(),
        rows: manager.execution_count(),
        drained,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if args.metrics {
        print!("{}", encode_metrics()?);
    }

    Ok(())
}

/// Push one queue's dispatches through begin/end in submission order
fn replay_queue(
    manager: &SessionManager,
    scenario: &Scenario,
    queue_id: u64,
    dispatches: &[&DispatchSpec],
) -> QueueStats {
    let queue = Queue { id: queue_id };
    let mut stats = QueueStats::default();

    for dispatch in dispatches {
        let agent = AgentHandle(dispatch.agent);
        let raw = scenario.packet_bytes(dispatch);

        for _ in 0..dispatch.repeat {
            stats.dispatched += 1;

            // The interception layer only sees the queue's packet bytes
            let packet = match DispatchPacket::from_bytes(&raw) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!("Skipping malformed packet on queue {}: {}", queue_id, e);
                    stats.malformed += 1;
                    continue;
                }
            };

            if manager.begin(agent, Some(&queue), Some(&packet), dispatch.translation_handle) {
                stats.begun += 1;
            }
            if manager.end(agent, Some(&queue), dispatch.translation_handle, SignalHandle(0)) {
                stats.ended += 1;
            }
        }
    }

    debug!("Queue {} replayed: {:?}", queue_id, stats);
    stats
}

/// Write collected occupancy entries next to the result file, one JSON
/// object per line
fn write_occupancy(output_path: &Path, log: &OccupancyLog) -> Result<PathBuf> {
    let path = output_path.with_extension("occupancy");
    let file = File::create(&path)
        .with_context(|| format!("Failed to create occupancy file: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for entry in log.entries() {
        serde_json::to_writer(&mut out, &entry)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(path)
}

fn print_summary(summary: &ReplaySummary) {
    if summary.drained {
        output::success(&format!(
            "Replayed {} dispatches on {} queue(s)",
            summary.totals.dispatched, summary.queues
        ));
    } else {
        output::warning("Replay finished with sessions still pending");
    }

    output::field("Captured", summary.totals.begun);
    output::field("Admitted", summary.admitted);
    output::field("Rows", summary.rows);
    if summary.totals.malformed > 0 {
        output::field("Malformed", summary.totals.malformed);
    }
    output::field("Results", summary.output.display());
    if let Some(path) = &summary.occupancy {
        output::field("Occupancy", path.display());
    }

    if summary.totals.begun < summary.totals.dispatched {
        output::info("Some dispatches were not captured; run with --verbose for details");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
[engine]
ready_after_polls = 2

[[device]]
agent = 1
chip_id = 0x7300
name = "Fiji"
generation = "volcanic-islands"
compute_units = 64
counters = ["SQ_WAVES"]

[[counter]]
name = "SQ_WAVES"
type = "uint32"
value = 4096.0

[[kernel]]
name = "reduce"
object = 0x2000
vgprs = 24

[[dispatch]]
queue = 1
agent = 1
kernel = "reduce"
grid = [1024]
workgroup = [64]
repeat = 3

[[dispatch]]
queue = 2
agent = 1
kernel = "reduce"
grid = [512]
workgroup = [64]
"#;

    fn replay_args(dir: &Path, json: bool) -> Result<ReplayArgs> {
        let scenario = dir.join("reduce.toml");
        std::fs::write(&scenario, SCENARIO)?;
        Ok(ReplayArgs {
            scenario,
            output: Some(dir.join("out").join("reduce.hsa.pmc")),
            config: None,
            json,
            metrics: false,
            drain_timeout: Some("5s".to_string()),
            verbose: false,
        })
    }

    #[test]
    fn test_replay_writes_one_row_per_dispatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        run(replay_args(dir.path(), true)?)?;

        let results = std::fs::read_to_string(dir.path().join("out").join("reduce.hsa.pmc"))?;
        let rows: Vec<&str> = results.lines().filter(|l| !l.starts_with('#')).collect();

        // Column line plus four dispatches
        assert_eq!(rows.len(), 5);
        assert!(rows[0].ends_with("SGPRs,SQ_WAVES"));

        let mut orders = Vec::new();
        for row in &rows[1..] {
            let fields: Vec<&str> = row.split(',').collect();
            assert_eq!(fields[0], "reduce_Fiji");
            orders.push(fields[1].parse::<u64>()?);
        }
        orders.sort_unstable();
        assert_eq!(orders, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_queue_stats_merge() {
        let mut totals = QueueStats::default();
        totals.merge(QueueStats {
            dispatched: 3,
            begun: 2,
            ended: 3,
            malformed: 0,
        });
        totals.merge(QueueStats {
            dispatched: 1,
            begun: 1,
            ended: 1,
            malformed: 1,
        });
        assert_eq!(totals.dispatched, 4);
        assert_eq!(totals.begun, 3);
        assert_eq!(totals.malformed, 1);
    }
}
