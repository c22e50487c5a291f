// SPDX-License-Identifier: GPL-3.0-only

//! Canonical device model for the staged storage engine
//!
//! This crate defines the single source of truth for the storage domain:
//!
//! - **storage-sys**: detection fills a [`DeviceModel`]
//! - **storage-engine**: the planner validates requests against it and the
//!   commit engine keeps it in sync with the real system
//! - **storage-testing**: lab fixtures deserialize straight into it
//!
//! ## Architecture
//!
//! - [`Disk`] → owns its [`Partition`]s, addressed in cylinders
//! - [`VolumeGroup`] → owns its [`LogicalVolume`]s, addressed in extents
//! - [`Volume`] → filesystem/mount/encryption attributes shared by both
//! - [`FsCapabilities`] → static per-filesystem capability catalog

pub mod capabilities;
pub mod common;
pub mod disk;
pub mod fstab;
pub mod lvm;
pub mod model;
pub mod partition;
pub mod space;
pub mod volume;

pub use capabilities::{FS_CAPABILITIES, FsCapabilities};
pub use common::{Region, bytes_to_pretty, kb_to_pretty};
pub use disk::{Disk, FIRST_LOGICAL};
pub use fstab::{FstabOptions, MountEntry, option_name};
pub use lvm::{LogicalVolume, PhysicalVolume, VolumeGroup, is_valid_lvm_name};
pub use model::{DeviceModel, VolumeRef};
pub use partition::{
    Partition, PartitionInfo, PartitionTable, PartitionType, default_id_for, ids,
};
pub use space::{FreeSlot, SpaceRequest};
pub use volume::{EncryptType, FsType, MountBy, Secret, UsedBy, Volume};
