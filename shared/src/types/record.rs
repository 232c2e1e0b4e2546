//! Kernel launch record
//!
//! Normalized description of one kernel dispatch, built once by the extractor
//! and read-only afterwards.

use serde::{Deserialize, Serialize};

/// Kernel name used when the finalizer has no symbol for the code handle
pub const UNKNOWN_KERNEL_NAME: &str = "<UnknownKernelName>";

/// Device name used when the device table has no entry for the agent
pub const UNKNOWN_DEVICE_NAME: &str = "<UnknownDeviceName>";

/// Resources a kernel uses. `None` means the value could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub vgprs: Option<u32>,
    pub sgprs: Option<u32>,
    pub lds_bytes: Option<u32>,
}

/// Resource ceilings of the device a kernel runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub vgprs: u32,
    pub sgprs: u32,
    pub lds_bytes: u32,
}

impl Default for ResourceLimits {
    /// Architecture constants; the runtime does not report these per agent.
    fn default() -> Self {
        Self {
            vgprs: 256,
            sgprs: 104,
            lds_bytes: 65536,
        }
    }
}

/// One kernel dispatch as seen by the profiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelLaunchRecord {
    /// Symbol name suffixed with `_<device name>`
    pub kernel_name: String,

    /// Display name of the device the kernel was dispatched to
    pub device_name: String,

    /// Thread that issued the dispatch
    pub thread_id: u64,

    /// Number of work dimensions (1-3)
    pub work_dim: u32,

    pub work_group_size: [u32; 3],
    pub global_work_size: [u32; 3],
    pub usage: ResourceUsage,
    pub limits: ResourceLimits,
}

impl KernelLaunchRecord {
    /// Record for a dispatch whose packet or code object could not be decoded
    pub fn placeholder(device_name: &str, thread_id: u64) -> Self {
        Self {
            kernel_name: format!("{}_{}", UNKNOWN_KERNEL_NAME, device_name),
            device_name: device_name.to_string(),
            thread_id,
            work_dim: 0,
            work_group_size: [0; 3],
            global_work_size: [0; 3],
            usage: ResourceUsage::default(),
            limits: ResourceLimits::default(),
        }
    }

    /// Work-items per work-group across the dispatched dimensions
    pub fn work_group_item_count(&self) -> u64 {
        Self::item_count(&self.work_group_size, self.work_dim)
    }

    /// Total work-items across the dispatched dimensions
    pub fn global_item_count(&self) -> u64 {
        Self::item_count(&self.global_work_size, self.work_dim)
    }

    fn item_count(sizes: &[u32; 3], work_dim: u32) -> u64 {
        let dims = (work_dim as usize).clamp(1, 3);
        sizes[..dims].iter().map(|&s| u64::from(s)).product()
    }
}
