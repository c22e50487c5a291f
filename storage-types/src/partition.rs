//! Partition model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::Region;
use crate::volume::{FsType, Volume};

/// Partition table label written to a disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTable {
    #[default]
    Msdos,
    Gpt,
}

impl PartitionTable {
    /// Highest number a primary (or extended) partition may take
    pub fn max_primary(self) -> u32 {
        match self {
            PartitionTable::Msdos => 4,
            PartitionTable::Gpt => 128,
        }
    }

    pub fn supports_extended(self) -> bool {
        matches!(self, PartitionTable::Msdos)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PartitionTable::Msdos => "msdos",
            PartitionTable::Gpt => "gpt",
        }
    }
}

impl fmt::Display for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "msdos" | "dos" | "mbr" => Ok(PartitionTable::Msdos),
            "gpt" => Ok(PartitionTable::Gpt),
            other => Err(format!("unsupported disk label: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionType::Primary => "primary",
            PartitionType::Extended => "extended",
            PartitionType::Logical => "logical",
        })
    }
}

/// Well-known msdos partition ids
pub mod ids {
    pub const LINUX: u32 = 0x83;
    pub const SWAP: u32 = 0x82;
    pub const EXTENDED: u32 = 0x0f;
    pub const LVM: u32 = 0x8e;
    pub const FAT32: u32 = 0x0c;
    pub const NTFS: u32 = 0x07;

    /// Ids that mark an msdos extended partition
    pub fn is_extended(id: u32) -> bool {
        matches!(id, 0x05 | 0x0f | 0x85)
    }
}

/// Default partition id for a filesystem
pub fn default_id_for(fs: FsType) -> u32 {
    match fs {
        FsType::Swap => ids::SWAP,
        FsType::Vfat => ids::FAT32,
        FsType::Ntfs => ids::NTFS,
        _ => ids::LINUX,
    }
}

/// One partition, owned by its [`Disk`](crate::Disk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Kernel device name, derived from disk and number
    pub device: String,

    pub number: u32,

    pub kind: PartitionType,

    /// Cylinder range; `volume.size_k` always agrees with it
    pub region: Region,

    /// Partition-table id byte
    pub id: u32,

    #[serde(default)]
    pub volume: Volume,
}

impl Partition {
    pub fn is_extended(&self) -> bool {
        self.kind == PartitionType::Extended
    }

    pub fn is_logical(&self) -> bool {
        self.kind == PartitionType::Logical
    }
}

/// Flat partition summary returned by the query API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub name: String,
    pub cyl_start: u64,
    pub cyl_size: u64,
    pub size_k: u64,
    pub partition_type: PartitionType,
    pub fs_type: FsType,
}

impl From<&Partition> for PartitionInfo {
    fn from(partition: &Partition) -> Self {
        Self {
            name: partition.device.clone(),
            cyl_start: partition.region.start,
            cyl_size: partition.region.len,
            size_k: partition.volume.size_k,
            partition_type: partition.kind,
            fs_type: partition.volume.fs,
        }
    }
}
