//! Disk model
//!
//! A disk owns its partitions, kept sorted by start cylinder. The helpers
//! here answer geometric questions only; policy (what is allowed) lives in
//! the planner.

use serde::{Deserialize, Serialize};

use crate::common::Region;
use crate::partition::{Partition, PartitionTable, PartitionType};

/// Number of the first logical partition on an msdos label
pub const FIRST_LOGICAL: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Device path (e.g., "/dev/sda")
    pub device: String,

    /// Size of one cylinder in bytes
    pub cyl_size: u64,

    /// Total number of cylinders
    pub cylinders: u64,

    pub label: PartitionTable,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn new(device: impl Into<String>, cyl_size: u64, cylinders: u64, label: PartitionTable) -> Self {
        Self {
            device: device.into(),
            cyl_size,
            cylinders,
            label,
            read_only: false,
            partitions: Vec::new(),
        }
    }

    pub fn size_k(&self) -> u64 {
        self.cylinder_to_kb(self.cylinders)
    }

    pub fn cylinder_to_kb(&self, cylinders: u64) -> u64 {
        cylinders.saturating_mul(self.cyl_size) / 1024
    }

    /// Cylinders needed to hold `size_k` KiB (rounded up)
    pub fn kb_to_cylinder(&self, size_k: u64) -> u64 {
        let cyl_k = (self.cyl_size / 1024).max(1);
        size_k.div_ceil(cyl_k)
    }

    /// Device name of partition `number` on this disk
    pub fn partition_device_name(&self, number: u32) -> String {
        if self.device.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{}p{}", self.device, number)
        } else {
            format!("{}{}", self.device, number)
        }
    }

    pub fn partition(&self, number: u32) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.number == number)
    }

    pub fn partition_by_device(&self, device: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.device == device)
    }

    pub fn partition_by_device_mut(&mut self, device: &str) -> Option<&mut Partition> {
        self.partitions.iter_mut().find(|p| p.device == device)
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.is_extended())
    }

    pub fn logicals(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(|p| p.is_logical())
    }

    /// Lowest free number for a primary or extended partition
    pub fn free_primary_number(&self) -> Option<u32> {
        (1..=self.label.max_primary()).find(|n| self.partition(*n).is_none())
    }

    /// Number the next logical partition gets
    pub fn next_logical_number(&self) -> u32 {
        self.logicals()
            .map(|p| p.number + 1)
            .max()
            .unwrap_or(FIRST_LOGICAL)
            .max(FIRST_LOGICAL)
    }

    /// Partitions a new partition of `kind` must not overlap. Logical
    /// partitions live inside the extended one and only collide with
    /// each other.
    pub fn overlapping(&self, region: &Region, kind: PartitionType) -> Option<&Partition> {
        self.partitions.iter().find(|p| {
            let same_level = match kind {
                PartitionType::Logical => p.is_logical(),
                _ => !p.is_logical(),
            };
            same_level && p.region.overlaps(region)
        })
    }

    /// Insert keeping partitions ordered by start cylinder (logicals after
    /// the extended partition that contains them).
    pub fn insert_partition(&mut self, partition: Partition) {
        let key = |p: &Partition| (p.region.start, p.is_logical(), p.number);
        let position = self
            .partitions
            .iter()
            .position(|p| key(p) > key(&partition))
            .unwrap_or(self.partitions.len());
        self.partitions.insert(position, partition);
    }

    pub fn remove_partition(&mut self, number: u32) -> Option<Partition> {
        let position = self.partitions.iter().position(|p| p.number == number)?;
        Some(self.partitions.remove(position))
    }

    /// Unused cylinder ranges between primary/extended partitions
    pub fn free_regions(&self) -> Vec<Region> {
        let occupied: Vec<Region> = self
            .partitions
            .iter()
            .filter(|p| !p.is_logical())
            .map(|p| p.region)
            .collect();
        gaps(Region::new(0, self.cylinders), occupied)
    }

    /// Unused cylinder ranges inside the extended partition
    pub fn free_logical_regions(&self) -> Vec<Region> {
        let Some(extended) = self.extended() else {
            return Vec::new();
        };
        let occupied: Vec<Region> = self.logicals().map(|p| p.region).collect();
        gaps(extended.region, occupied)
    }
}

fn gaps(bounds: Region, mut occupied: Vec<Region>) -> Vec<Region> {
    occupied.sort_by_key(|r| r.start);
    let mut free = Vec::new();
    let mut cursor = bounds.start;
    for region in occupied {
        if region.start > cursor {
            free.push(Region::new(cursor, region.start - cursor));
        }
        cursor = cursor.max(region.end());
    }
    if cursor < bounds.end() {
        free.push(Region::new(cursor, bounds.end() - cursor));
    }
    free
}
