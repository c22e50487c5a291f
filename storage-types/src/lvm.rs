//! LVM (Logical Volume Manager) types
//!
//! Types for LVM volume group, logical volume, and physical volume management.

use serde::{Deserialize, Serialize};

use crate::volume::Volume;

/// Physical volume assigned to a volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolume {
    /// Device path (e.g., "/dev/sda1")
    pub device: String,

    /// Physical extents this device contributes
    pub pe_count: u64,
}

/// Logical volume, owned by its volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    /// Logical volume name
    pub name: String,

    /// Parent volume group name
    pub vg_name: String,

    /// Device path (e.g., "/dev/vg0/lv0")
    pub device: String,

    /// Size in logical extents
    pub extents: u64,

    pub stripes: u32,

    #[serde(default)]
    pub volume: Volume,
}

impl LogicalVolume {
    pub fn device_path(vg_name: &str, name: &str) -> String {
        format!("/dev/{vg_name}/{name}")
    }

    /// Get a display name for this logical volume
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.vg_name, self.name)
    }
}

/// Volume group information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroup {
    /// Volume group name
    pub name: String,

    /// Physical extent size in KiB
    pub pe_size_k: u64,

    /// Uses the LVM1 compatible metadata format
    #[serde(default)]
    pub lvm1: bool,

    /// Member devices in the order they were added
    #[serde(default)]
    pub physical_volumes: Vec<PhysicalVolume>,

    #[serde(default)]
    pub logical_volumes: Vec<LogicalVolume>,
}

impl VolumeGroup {
    pub fn total_pe(&self) -> u64 {
        self.physical_volumes.iter().map(|pv| pv.pe_count).sum()
    }

    pub fn used_pe(&self) -> u64 {
        self.logical_volumes.iter().map(|lv| lv.extents).sum()
    }

    pub fn free_pe(&self) -> u64 {
        self.total_pe().saturating_sub(self.used_pe())
    }

    /// Extents needed for `size_k` KiB (rounded up)
    pub fn size_to_extents(&self, size_k: u64) -> u64 {
        size_k.div_ceil(self.pe_size_k.max(1))
    }

    pub fn extents_to_kb(&self, extents: u64) -> u64 {
        extents.saturating_mul(self.pe_size_k)
    }

    /// Extents a device of `size_k` KiB contributes
    pub fn pe_for_device(&self, size_k: u64) -> u64 {
        size_k / self.pe_size_k.max(1)
    }

    pub fn has_device(&self, device: &str) -> bool {
        self.physical_volumes.iter().any(|pv| pv.device == device)
    }

    pub fn lv(&self, name: &str) -> Option<&LogicalVolume> {
        self.logical_volumes.iter().find(|lv| lv.name == name)
    }

    pub fn lv_by_device(&self, device: &str) -> Option<&LogicalVolume> {
        self.logical_volumes.iter().find(|lv| lv.device == device)
    }

    /// Get usage percentage (0-100)
    pub fn usage_percent(&self) -> u32 {
        let total = self.total_pe();
        if total == 0 {
            0
        } else {
            ((self.used_pe() as f64 / total as f64) * 100.0) as u32
        }
    }
}

/// Whether a name is acceptable for a volume group or logical volume:
/// non-empty, no blanks, colons, slashes or shell metacharacters.
pub fn is_valid_lvm_name(name: &str) -> bool {
    const FORBIDDEN: &[char] = &[
        ' ', '\t', '\n', ':', '/', '\\', '"', '\'', '`', '$', '&', '|', ';', '<', '>', '(', ')',
        '*', '?', '[', ']', '{', '}', '!', '#', '~',
    ];
    !name.is_empty()
        && name.len() <= 127
        && !name.starts_with('-')
        && name != "."
        && name != ".."
        && !name.contains(FORBIDDEN)
        && name.chars().all(|c| c.is_ascii_graphic())
}
