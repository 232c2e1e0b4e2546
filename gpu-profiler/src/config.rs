//! Profiler configuration
//!
//! Loaded from an optional TOML file, then overridden by `KERNSCOPE_*`
//! environment variables (`KERNSCOPE_MAX_KERNELS=500`).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kernel limit when none is configured; not echoed into the result header
pub const DEFAULT_MAX_KERNELS: u64 = 100_000;

/// Extension of per-kernel counter result files
pub const PERF_COUNTER_EXT: &str = "pmc";
const TRACE_EXT: &str = "atp";
const OCCUPANCY_EXT: &str = "occupancy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Result file. See [`output_path`] for how it is normalized.
    pub output_file: Option<PathBuf>,

    /// Counter selection file handed to the counter engine
    pub counter_file: Option<PathBuf>,

    pub list_separator: char,

    /// Start with capture disabled until explicitly enabled
    pub start_disabled: bool,

    /// Dispatches to capture before skipping the rest
    pub max_kernels: u64,

    /// Submit an occupancy entry per captured dispatch
    pub kernel_occupancy: bool,

    /// How long `begin` waits for the previous session on a queue
    pub session_timeout_secs: u64,

    /// Per-queue wait budget when draining at shutdown
    pub drain_timeout_secs: u64,

    /// Display name recorded in the result header
    pub session_name: String,

    pub app_args: String,
    pub working_dir: Option<PathBuf>,
    pub full_environment: bool,
    pub env_vars: BTreeMap<String, String>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            output_file: None,
            counter_file: None,
            list_separator: ',',
            start_disabled: false,
            max_kernels: DEFAULT_MAX_KERNELS,
            kernel_occupancy: false,
            session_timeout_secs: 10,
            drain_timeout_secs: 10,
            session_name: String::new(),
            app_args: String::new(),
            working_dir: None,
            full_environment: false,
            env_vars: BTreeMap::new(),
        }
    }
}

impl ProfilerConfig {
    /// Load from `path` (if given and present) layered under the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: ProfilerConfig = builder
            .add_source(config::Environment::with_prefix("KERNSCOPE").try_parsing(true))
            .build()
            .context("Failed to read profiler configuration")?
            .try_deserialize()
            .context("Invalid profiler configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == 0 {
            bail!("Session timeout must be greater than 0");
        }

        if self.max_kernels == 0 {
            bail!("Max kernels must be greater than 0");
        }

        if self.list_separator.is_alphanumeric() {
            bail!("Invalid list separator: {:?}", self.list_separator);
        }

        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Result file for this run, named after the executable when unset
    pub fn resolve_output_path(&self, exe_name: &str) -> PathBuf {
        let default_dir = self
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        output_path(self.output_file.as_deref(), &default_dir, exe_name)
    }
}

/// Normalize a requested output path to a `.hsa.pmc` file.
///
/// Trace (`.atp`) and occupancy (`.occupancy`) file names are rewritten to
/// their counter-result sibling, other names get the suffix appended.
pub fn output_path(requested: Option<&Path>, default_dir: &Path, exe_name: &str) -> PathBuf {
    let suffix = format!("hsa.{}", PERF_COUNTER_EXT);

    let requested = match requested {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => return default_dir.join(format!("{}.{}", exe_name, suffix)),
    };

    match requested.extension().and_then(|e| e.to_str()) {
        Some(PERF_COUNTER_EXT) => requested.to_path_buf(),
        Some(TRACE_EXT) | Some(OCCUPANCY_EXT) => requested.with_extension(suffix),
        _ => {
            let mut name = requested.as_os_str().to_owned();
            name.push(".");
            name.push(&suffix);
            PathBuf::from(name)
        }
    }
}
