//! Occupancy entries
//!
//! The profiler only assembles the inputs of the occupancy calculation for
//! each captured dispatch; the arithmetic belongs to the calculator.

use crate::device::{DeviceInfo, HwGeneration};
use crate::error::ProfilerError;
use anyhow::Result;
use kernscope_shared::{KernelLaunchRecord, ResourceLimits, ResourceUsage};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// Largest work-group the runtime accepts
pub const WORK_GROUP_ITEM_COUNT_MAX: u64 = 256;

/// Largest global size the runtime accepts
pub const GLOBAL_ITEM_COUNT_MAX: u64 = 0x100_0000;

/// Compute unit model used for the occupancy calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CuModel {
    /// Sea Islands
    Si,
    /// Volcanic Islands and newer
    Vi,
}

impl CuModel {
    /// Model for a hardware generation. Generations older than Sea Islands
    /// have no HSA support.
    pub fn for_generation(generation: HwGeneration) -> Option<Self> {
        match generation {
            g if g >= HwGeneration::VolcanicIslands => Some(CuModel::Vi),
            HwGeneration::SeaIslands => Some(CuModel::Si),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyEntry {
    pub thread_id: u64,
    pub kernel_name: String,
    pub device_name: String,
    pub work_group_item_count: u64,
    pub work_group_item_count_max: u64,
    pub global_item_count: u64,
    pub global_item_count_max: u64,

    /// `None` when the runtime could not report it
    pub compute_units: Option<u32>,

    pub cu_model: CuModel,
    pub usage: ResourceUsage,
    pub limits: ResourceLimits,
}

/// Receives one entry per captured dispatch
pub trait OccupancyCalculator: Send + Sync {
    fn add_entry(&self, entry: OccupancyEntry) -> Result<()>;
}

/// Assemble the occupancy entry for a captured dispatch.
///
/// Fails without an entry when the device's hardware generation is unknown
/// or predates Sea Islands.
pub fn build_entry(
    record: &KernelLaunchRecord,
    device_name: &str,
    compute_units: Option<u32>,
    devices: &dyn DeviceInfo,
) -> Result<OccupancyEntry, ProfilerError> {
    let generation = devices.hardware_generation(device_name).ok_or_else(|| {
        ProfilerError::Occupancy(format!(
            "unable to query the hardware generation of {}",
            device_name
        ))
    })?;

    let cu_model = CuModel::for_generation(generation).ok_or_else(|| {
        ProfilerError::Occupancy(format!("unsupported hardware generation {:?}", generation))
    })?;

    Ok(OccupancyEntry {
        thread_id: record.thread_id,
        kernel_name: record.kernel_name.clone(),
        device_name: device_name.to_string(),
        work_group_item_count: record.work_group_item_count(),
        work_group_item_count_max: WORK_GROUP_ITEM_COUNT_MAX,
        global_item_count: record.global_item_count(),
        global_item_count_max: GLOBAL_ITEM_COUNT_MAX,
        compute_units,
        cu_model,
        usage: record.usage,
        limits: record.limits,
    })
}

/// Collects entries in memory
#[derive(Debug, Default)]
pub struct OccupancyLog {
    entries: Mutex<Vec<OccupancyEntry>>,
}

impl OccupancyLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OccupancyEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<OccupancyEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl OccupancyCalculator for OccupancyLog {
    fn add_entry(&self, entry: OccupancyEntry) -> Result<()> {
        self.lock().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceTable;

    fn devices() -> DeviceTable {
        DeviceTable::new()
            .with_device(0x7300, "Fiji", HwGeneration::VolcanicIslands)
            .with_device(0x6600, "Bonaire", HwGeneration::SeaIslands)
            .with_device(0x6798, "Tahiti", HwGeneration::SouthernIslands)
    }

    fn record(device: &str) -> KernelLaunchRecord {
        KernelLaunchRecord {
            work_dim: 2,
            work_group_size: [16, 8, 4],
            global_work_size: [512, 256, 4],
            ..KernelLaunchRecord::placeholder(device, 9)
        }
    }

    #[test]
    fn test_entry_counts_and_limits() {
        let entry = build_entry(&record("Fiji"), "Fiji", Some(64), &devices()).unwrap();

        assert_eq!(entry.work_group_item_count, 128);
        assert_eq!(entry.global_item_count, 512 * 256);
        assert_eq!(entry.work_group_item_count_max, 256);
        assert_eq!(entry.global_item_count_max, 0x100_0000);
        assert_eq!(entry.compute_units, Some(64));
        assert_eq!(entry.cu_model, CuModel::Vi);
        assert_eq!(entry.thread_id, 9);
    }

    #[test]
    fn test_generation_selects_model() {
        let entry = build_entry(&record("Bonaire"), "Bonaire", None, &devices()).unwrap();
        assert_eq!(entry.cu_model, CuModel::Si);
        assert_eq!(CuModel::for_generation(HwGeneration::Gfx9), Some(CuModel::Vi));
    }

    #[test]
    fn test_old_or_unknown_generation_rejected() {
        assert!(matches!(
            build_entry(&record("Tahiti"), "Tahiti", Some(32), &devices()),
            Err(ProfilerError::Occupancy(_))
        ));
        assert!(matches!(
            build_entry(&record("Nope"), "Nope", Some(32), &devices()),
            Err(ProfilerError::Occupancy(_))
        ));
    }

    #[test]
    fn test_log_collects_entries() {
        let log = OccupancyLog::new();
        let entry = build_entry(&record("Fiji"), "Fiji", Some(64), &devices()).unwrap();
        log.add_entry(entry.clone()).unwrap();

        assert_eq!(log.entries(), vec![entry]);
    }
}
