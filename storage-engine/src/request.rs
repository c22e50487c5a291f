// SPDX-License-Identifier: GPL-3.0-only

//! Request plans
//!
//! A plan is a TOML list of manager requests, applied in file order:
//!
//! ```toml
//! [[request]]
//! op = "create_partition_any"
//! disk = "/dev/sda"
//! size_k = 1048576
//!
//! [[request]]
//! op = "format"
//! device = "/dev/sda1"
//! fs = "ext4"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use storage_contracts::{StorageInterface, StorageResult};
use storage_types::{FsType, MountBy, PartitionType, SpaceRequest};

use crate::error::{EngineError, Result};

fn yes() -> bool {
    true
}

fn default_pe_size_k() -> u64 {
    4096
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, rename = "request")]
    pub requests: Vec<Request>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| EngineError::Plan {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&raw).map_err(|reason| EngineError::Plan {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreatePartition {
        disk: String,
        kind: PartitionType,
        start_cyl: u64,
        size_cyl: u64,
    },
    CreatePartitionKb {
        disk: String,
        kind: PartitionType,
        start_k: u64,
        size_k: u64,
    },
    CreatePartitionAny {
        disk: String,
        size_k: u64,
    },
    /// Free room without creating anything yet
    MakeSpace(SpaceRequest),
    RemovePartition {
        device: String,
    },
    ChangePartitionId {
        device: String,
        id: u32,
    },
    DestroyPartitionTable {
        disk: String,
        label: String,
    },
    Format {
        device: String,
        fs: FsType,
        #[serde(default = "yes")]
        format: bool,
    },
    Label {
        device: String,
        label: String,
    },
    MountPoint {
        device: String,
        mount_point: String,
    },
    MountBy {
        device: String,
        mount_by: MountBy,
    },
    FstabOptions {
        device: String,
        options: String,
    },
    AddFstabOptions {
        device: String,
        options: String,
    },
    RemoveFstabOptions {
        device: String,
        patterns: String,
    },
    CryptPassword {
        device: String,
        password: String,
    },
    Crypt {
        device: String,
        encrypt: bool,
    },
    Resize {
        device: String,
        size_mb: u64,
    },
    CreateVg {
        name: String,
        #[serde(default = "default_pe_size_k")]
        pe_size_k: u64,
        #[serde(default)]
        lvm1: bool,
        devices: Vec<String>,
    },
    RemoveVg {
        name: String,
    },
    ExtendVg {
        name: String,
        devices: Vec<String>,
    },
    ShrinkVg {
        name: String,
        devices: Vec<String>,
    },
    CreateLv {
        vg: String,
        name: String,
        size_mb: u64,
        #[serde(default = "one")]
        stripes: u32,
    },
    RemoveLv {
        device: String,
    },
}

fn refs(devices: &[String]) -> Vec<&str> {
    devices.iter().map(String::as_str).collect()
}

impl Request {
    /// Issue the request; returns the device it created, if any.
    pub fn apply(&self, manager: &mut dyn StorageInterface) -> StorageResult<Option<String>> {
        let created = match self {
            Request::CreatePartition {
                disk,
                kind,
                start_cyl,
                size_cyl,
            } => Some(manager.create_partition(disk, *kind, *start_cyl, *size_cyl)?),
            Request::CreatePartitionKb {
                disk,
                kind,
                start_k,
                size_k,
            } => Some(manager.create_partition_kb(disk, *kind, *start_k, *size_k)?),
            Request::CreatePartitionAny { disk, size_k } => {
                Some(manager.create_partition_any(disk, *size_k)?)
            }
            Request::MakeSpace(request) => {
                manager.make_space(request)?;
                None
            }
            Request::RemovePartition { device } => {
                manager.remove_partition(device)?;
                None
            }
            Request::ChangePartitionId { device, id } => {
                manager.change_partition_id(device, *id)?;
                None
            }
            Request::DestroyPartitionTable { disk, label } => {
                manager.destroy_partition_table(disk, label)?;
                None
            }
            Request::Format { device, fs, format } => {
                manager.change_format_volume(device, *format, *fs)?;
                None
            }
            Request::Label { device, label } => {
                manager.change_label(device, label)?;
                None
            }
            Request::MountPoint {
                device,
                mount_point,
            } => {
                manager.change_mount_point(device, mount_point)?;
                None
            }
            Request::MountBy { device, mount_by } => {
                manager.change_mount_by(device, *mount_by)?;
                None
            }
            Request::FstabOptions { device, options } => {
                manager.change_fstab_options(device, options)?;
                None
            }
            Request::AddFstabOptions { device, options } => {
                manager.add_fstab_options(device, options)?;
                None
            }
            Request::RemoveFstabOptions { device, patterns } => {
                manager.remove_fstab_options(device, patterns)?;
                None
            }
            Request::CryptPassword { device, password } => {
                manager.set_crypt_password(device, password)?;
                None
            }
            Request::Crypt { device, encrypt } => {
                manager.set_crypt(device, *encrypt)?;
                None
            }
            Request::Resize { device, size_mb } => {
                manager.resize_volume(device, *size_mb)?;
                None
            }
            Request::CreateVg {
                name,
                pe_size_k,
                lvm1,
                devices,
            } => {
                manager.create_lvm_vg(name, *pe_size_k, *lvm1, &refs(devices))?;
                None
            }
            Request::RemoveVg { name } => {
                manager.remove_lvm_vg(name)?;
                None
            }
            Request::ExtendVg { name, devices } => {
                manager.extend_lvm_vg(name, &refs(devices))?;
                None
            }
            Request::ShrinkVg { name, devices } => {
                manager.shrink_lvm_vg(name, &refs(devices))?;
                None
            }
            Request::CreateLv {
                vg,
                name,
                size_mb,
                stripes,
            } => Some(manager.create_lvm_lv(vg, name, *size_mb, *stripes)?),
            Request::RemoveLv { device } => {
                manager.remove_lvm_lv(device)?;
                None
            }
        };
        Ok(created)
    }
}
