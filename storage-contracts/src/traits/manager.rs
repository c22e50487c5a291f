// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use storage_types::{
    FreeSlot, FsCapabilities, FsType, LogicalVolume, MountBy, PartitionInfo, PartitionTable,
    PartitionType, SpaceRequest,
};

use crate::{ActionRecord, CommitReport, ProgressHandler, StorageError};

pub type StorageResult<T> = Result<T, StorageError>;

/// Public manager surface.
///
/// Mutating calls validate against the staged model and either queue an
/// action (cache mode on) or commit it right away (cache mode off).
/// Sizes are KiB unless the name says otherwise; cylinder arguments are
/// 0-based.
pub trait StorageInterface {
    fn get_disks(&self) -> Vec<String>;

    fn get_partitions(&self) -> Vec<PartitionInfo>;

    fn get_partitions_on(&self, disk: &str) -> StorageResult<Vec<PartitionInfo>>;

    fn get_volume_groups(&self) -> Vec<String>;

    fn get_logical_volumes(&self, vg: &str) -> StorageResult<Vec<LogicalVolume>>;

    fn get_fs_capabilities(&self, fs: FsType) -> Option<FsCapabilities>;

    /// Dump the staged model for diagnostics
    fn print_info(&self, out: &mut dyn io::Write) -> io::Result<()>;

    /// Returns the device name of the new partition
    fn create_partition(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start_cyl: u64,
        size_cyl: u64,
    ) -> StorageResult<String>;

    fn create_partition_kb(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start_k: u64,
        size_k: u64,
    ) -> StorageResult<String>;

    /// Place a partition in the first free region that fits
    fn create_partition_any(&mut self, disk: &str, size_k: u64) -> StorageResult<String>;

    /// Unused regions of `disks` a new partition could be placed in
    fn find_space(&self, disks: &[&str]) -> StorageResult<Vec<FreeSlot>>;

    /// Make room for `request.size_k` on one of the requested disks,
    /// shrinking or deleting partitions if unused space is not enough.
    fn make_space(&mut self, request: &SpaceRequest) -> StorageResult<FreeSlot>;

    fn cylinder_to_kb(&self, disk: &str, cylinders: u64) -> StorageResult<u64>;

    fn kb_to_cylinder(&self, disk: &str, size_k: u64) -> StorageResult<u64>;

    fn remove_partition(&mut self, partition: &str) -> StorageResult<()>;

    fn change_partition_id(&mut self, partition: &str, id: u32) -> StorageResult<()>;

    fn destroy_partition_table(&mut self, disk: &str, label: &str) -> StorageResult<()>;

    fn default_disk_label(&self) -> PartitionTable;

    fn change_format_volume(&mut self, device: &str, format: bool, fs: FsType)
    -> StorageResult<()>;

    fn change_label(&mut self, device: &str, label: &str) -> StorageResult<()>;

    /// An empty mount point removes the volume from the mount table
    fn change_mount_point(&mut self, device: &str, mount_point: &str) -> StorageResult<()>;

    fn get_mount_point(&self, device: &str) -> StorageResult<String>;

    fn change_mount_by(&mut self, device: &str, mount_by: MountBy) -> StorageResult<()>;

    fn get_mount_by(&self, device: &str) -> StorageResult<MountBy>;

    /// Replace the whole option set
    fn change_fstab_options(&mut self, device: &str, options: &str) -> StorageResult<()>;

    fn get_fstab_options(&self, device: &str) -> StorageResult<String>;

    fn add_fstab_options(&mut self, device: &str, options: &str) -> StorageResult<()>;

    /// Remove options matching comma separated patterns (`uid=.*`)
    fn remove_fstab_options(&mut self, device: &str, patterns: &str) -> StorageResult<()>;

    fn set_crypt_password(&mut self, device: &str, password: &str) -> StorageResult<()>;

    fn set_crypt(&mut self, device: &str, encrypt: bool) -> StorageResult<()>;

    fn get_crypt(&self, device: &str) -> StorageResult<bool>;

    fn resize_volume(&mut self, device: &str, new_size_mb: u64) -> StorageResult<()>;

    fn create_lvm_vg(
        &mut self,
        name: &str,
        pe_size_k: u64,
        lvm1: bool,
        devices: &[&str],
    ) -> StorageResult<()>;

    fn remove_lvm_vg(&mut self, name: &str) -> StorageResult<()>;

    fn extend_lvm_vg(&mut self, name: &str, devices: &[&str]) -> StorageResult<()>;

    fn shrink_lvm_vg(&mut self, name: &str, devices: &[&str]) -> StorageResult<()>;

    /// Returns the device path of the new logical volume
    fn create_lvm_lv(
        &mut self,
        vg: &str,
        name: &str,
        size_mb: u64,
        stripes: u32,
    ) -> StorageResult<String>;

    fn remove_lvm_lv(&mut self, device: &str) -> StorageResult<()>;

    fn remove_lvm_lv_by_name(&mut self, vg: &str, name: &str) -> StorageResult<()>;

    /// Human readable pending actions in commit order
    fn get_commit_actions(&self, mark_destructive: bool) -> Vec<String>;

    /// Structured form of [`get_commit_actions`](Self::get_commit_actions)
    fn pending_actions(&self) -> Vec<ActionRecord>;

    fn set_progress_handler(&mut self, handler: Option<Box<dyn ProgressHandler>>);

    fn has_progress_handler(&self) -> bool;

    /// Turning caching off commits everything queued so far; the mode
    /// changes even when that commit fails.
    fn set_cache_changes(&mut self, cache: bool) -> StorageResult<()>;

    fn is_cache_changes(&self) -> bool;

    fn commit(&mut self) -> StorageResult<CommitReport>;
}
