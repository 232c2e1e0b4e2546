//! Device identification

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// GPU hardware generation, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HwGeneration {
    Evergreen,
    NorthernIslands,
    SouthernIslands,
    SeaIslands,
    VolcanicIslands,
    Gfx9,
}

/// Chip id → display name and name → generation lookup
pub trait DeviceInfo: Send + Sync {
    fn device_name(&self, chip_id: u32, revision_id: u32) -> Option<String>;
    fn hardware_generation(&self, device_name: &str) -> Option<HwGeneration>;
}

/// In-memory device table
#[derive(Debug, Default, Clone)]
pub struct DeviceTable {
    names: HashMap<u32, String>,
    generations: HashMap<String, HwGeneration>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chip_id: u32, name: impl Into<String>, generation: HwGeneration) {
        let name = name.into();
        self.generations.insert(name.clone(), generation);
        self.names.insert(chip_id, name);
    }

    pub fn with_device(
        mut self,
        chip_id: u32,
        name: impl Into<String>,
        generation: HwGeneration,
    ) -> Self {
        self.insert(chip_id, name, generation);
        self
    }
}

impl DeviceInfo for DeviceTable {
    // Revisions share a display name.
    fn device_name(&self, chip_id: u32, _revision_id: u32) -> Option<String> {
        self.names.get(&chip_id).cloned()
    }

    fn hardware_generation(&self, device_name: &str) -> Option<HwGeneration> {
        self.generations.get(device_name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let table = DeviceTable::new().with_device(0x7300, "Fiji", HwGeneration::VolcanicIslands);

        assert_eq!(table.device_name(0x7300, 0).as_deref(), Some("Fiji"));
        assert_eq!(
            table.hardware_generation("Fiji"),
            Some(HwGeneration::VolcanicIslands)
        );
        assert_eq!(table.device_name(0x1234, 0), None);
    }

    #[test]
    fn test_generation_order() {
        assert!(HwGeneration::Gfx9 > HwGeneration::VolcanicIslands);
        assert!(HwGeneration::SeaIslands < HwGeneration::VolcanicIslands);
    }
}
