use serde::{Deserialize, Serialize};

use crate::{PartitionType, Region};

/// Room wanted for new partitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRequest {
    /// Disks to take the room from, most preferred first
    pub disks: Vec<String>,
    /// Contiguous size needed
    pub size_k: u64,
    /// Partitions that may be deleted, tried in this order
    #[serde(default)]
    pub deletable: Vec<String>,
    /// Shrink an NTFS or VFAT partition before deleting anything
    #[serde(default)]
    pub shrink_windows: bool,
}

/// Unused cylinders where a partition of `kind` can still be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub disk: String,
    pub kind: PartitionType,
    pub region: Region,
    pub size_k: u64,
}
