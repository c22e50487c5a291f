// SPDX-License-Identifier: GPL-3.0-only

//! The [`StorageInterface`] implementation
//!
//! Queries read the staged model, so callers see their pending changes.
//! With caching off every successful request is committed before the
//! call returns.

use std::io;

use storage_contracts::{
    ActionRecord, CommitReport, ManagerError, ProgressHandler, StorageInterface, StorageResult,
};
use storage_sys::{MountTable, ToolRunner};
use storage_types::{
    DeviceModel, FreeSlot, FsCapabilities, FsType, LogicalVolume, MountBy, PartitionInfo,
    PartitionTable, PartitionType, SpaceRequest, Volume, kb_to_pretty,
};
use tracing::{debug, info};

use crate::action::PendingAction;
use crate::commit::{Committer, ProgressSink};
use crate::config::EngineConfig;
use crate::planner::Staging;

const DESTRUCTIVE_MARK: &str = "[destructive] ";

pub struct StorageManager {
    staging: Staging,
    runner: Box<dyn ToolRunner>,
    table: Box<dyn MountTable>,
    progress: Option<Box<dyn ProgressHandler>>,
    cache_changes: bool,
    read_only: bool,
    default_label: PartitionTable,
    min_password_len: usize,
}

impl StorageManager {
    pub fn new(
        model: DeviceModel,
        runner: Box<dyn ToolRunner>,
        table: Box<dyn MountTable>,
        config: &EngineConfig,
    ) -> Self {
        info!(
            "Storage manager ready: {} disk(s), {} volume group(s){}",
            model.disks.len(),
            model.volume_groups.len(),
            if config.read_only { ", read-only" } else { "" }
        );
        Self {
            staging: Staging::new(model),
            runner,
            table,
            progress: None,
            cache_changes: config.cache_changes,
            read_only: config.read_only,
            default_label: config.default_label,
            min_password_len: config.min_password_len,
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Run a planning request, then commit it right away unless caching.
    fn mutate<T>(
        &mut self,
        change: impl FnOnce(&mut Staging) -> StorageResult<T>,
    ) -> StorageResult<T> {
        if self.read_only {
            return Err(ManagerError::ChangeReadonly.into());
        }
        if self.cache_changes {
            return change(&mut self.staging);
        }
        let before = self.staging.clone();
        let value = change(&mut self.staging)?;
        match self.commit() {
            Err(e) if e.is_nothing_to_do() => {}
            Err(e) => {
                if e.as_partial().is_none() {
                    debug!("Nothing ran, dropping the request: {}", e);
                    self.staging = before;
                }
                return Err(e);
            }
            Ok(_) => {}
        }
        Ok(value)
    }

    fn volume(&self, device: &str) -> StorageResult<&Volume> {
        self.staging
            .staged()
            .volume(device)
            .ok_or_else(|| ManagerError::VolumeNotFound.into())
    }

    /// Pending actions in the order a commit would run them
    fn ordered(&self) -> Vec<&PendingAction> {
        let pending = self.staging.pending();
        match self.staging.schedule() {
            Ok(schedule) => schedule.order.iter().map(|&i| &pending[i]).collect(),
            Err(_) => pending.iter().collect(),
        }
    }
}

impl StorageInterface for StorageManager {
    fn get_disks(&self) -> Vec<String> {
        self.staging
            .staged()
            .disks
            .iter()
            .map(|d| d.device.clone())
            .collect()
    }

    fn get_partitions(&self) -> Vec<PartitionInfo> {
        self.staging
            .staged()
            .disks
            .iter()
            .flat_map(|d| d.partitions.iter().map(PartitionInfo::from))
            .collect()
    }

    fn get_partitions_on(&self, disk: &str) -> StorageResult<Vec<PartitionInfo>> {
        let disk = self
            .staging
            .staged()
            .disk(disk)
            .ok_or(ManagerError::DiskNotFound)?;
        Ok(disk.partitions.iter().map(PartitionInfo::from).collect())
    }

    fn get_volume_groups(&self) -> Vec<String> {
        self.staging
            .staged()
            .volume_groups
            .iter()
            .map(|vg| vg.name.clone())
            .collect()
    }

    fn get_logical_volumes(&self, vg: &str) -> StorageResult<Vec<LogicalVolume>> {
        let group = self
            .staging
            .staged()
            .volume_group(vg)
            .ok_or(ManagerError::LvmVgNotFound)?;
        Ok(group.logical_volumes.clone())
    }

    fn get_fs_capabilities(&self, fs: FsType) -> Option<FsCapabilities> {
        FsCapabilities::for_fs(fs)
    }

    fn print_info(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let model = self.staging.staged();
        for disk in &model.disks {
            writeln!(
                out,
                "Disk {} {} {} cylinders of {}{}",
                disk.device,
                disk.label,
                disk.cylinders,
                kb_to_pretty(disk.cylinder_to_kb(1)),
                if disk.read_only { " (read-only)" } else { "" }
            )?;
            for partition in &disk.partitions {
                writeln!(
                    out,
                    "  {} {} cyl {} id {:x} {} {}",
                    partition.device,
                    partition.kind,
                    partition.region,
                    partition.id,
                    kb_to_pretty(partition.volume.size_k),
                    describe_volume(&partition.volume)
                )?;
            }
        }
        for vg in &model.volume_groups {
            writeln!(
                out,
                "Volume group {} pe {} {}/{} extents free",
                vg.name,
                kb_to_pretty(vg.pe_size_k),
                vg.free_pe(),
                vg.total_pe()
            )?;
            for pv in &vg.physical_volumes {
                writeln!(out, "  pv {} {} extents", pv.device, pv.pe_count)?;
            }
            for lv in &vg.logical_volumes {
                writeln!(
                    out,
                    "  lv {} {} extents {} {}",
                    lv.device,
                    lv.extents,
                    kb_to_pretty(lv.volume.size_k),
                    describe_volume(&lv.volume)
                )?;
            }
        }
        let pending = self.ordered();
        if !pending.is_empty() {
            writeln!(out, "Pending:")?;
            for action in pending {
                writeln!(out, "  {}", action)?;
            }
        }
        Ok(())
    }

    fn create_partition(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start_cyl: u64,
        size_cyl: u64,
    ) -> StorageResult<String> {
        self.mutate(|s| s.create_partition(disk, kind, start_cyl, size_cyl))
    }

    fn create_partition_kb(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start_k: u64,
        size_k: u64,
    ) -> StorageResult<String> {
        self.mutate(|s| s.create_partition_kb(disk, kind, start_k, size_k))
    }

    fn create_partition_any(&mut self, disk: &str, size_k: u64) -> StorageResult<String> {
        self.mutate(|s| s.create_partition_any(disk, size_k))
    }

    fn find_space(&self, disks: &[&str]) -> StorageResult<Vec<FreeSlot>> {
        self.staging.find_space(disks)
    }

    fn make_space(&mut self, request: &SpaceRequest) -> StorageResult<FreeSlot> {
        self.mutate(|s| s.make_space(request))
    }

    fn cylinder_to_kb(&self, disk: &str, cylinders: u64) -> StorageResult<u64> {
        let disk = self
            .staging
            .staged()
            .disk(disk)
            .ok_or(ManagerError::DiskNotFound)?;
        Ok(disk.cylinder_to_kb(cylinders))
    }

    fn kb_to_cylinder(&self, disk: &str, size_k: u64) -> StorageResult<u64> {
        let disk = self
            .staging
            .staged()
            .disk(disk)
            .ok_or(ManagerError::DiskNotFound)?;
        Ok(disk.kb_to_cylinder(size_k))
    }

    fn remove_partition(&mut self, partition: &str) -> StorageResult<()> {
        self.mutate(|s| s.remove_partition(partition))
    }

    fn change_partition_id(&mut self, partition: &str, id: u32) -> StorageResult<()> {
        self.mutate(|s| s.change_partition_id(partition, id))
    }

    fn destroy_partition_table(&mut self, disk: &str, label: &str) -> StorageResult<()> {
        self.mutate(|s| s.destroy_partition_table(disk, label))
    }

    fn default_disk_label(&self) -> PartitionTable {
        self.default_label
    }

    fn change_format_volume(
        &mut self,
        device: &str,
        format: bool,
        fs: FsType,
    ) -> StorageResult<()> {
        self.mutate(|s| s.change_format_volume(device, format, fs))
    }

    fn change_label(&mut self, device: &str, label: &str) -> StorageResult<()> {
        self.mutate(|s| s.change_label(device, label))
    }

    fn change_mount_point(&mut self, device: &str, mount_point: &str) -> StorageResult<()> {
        self.mutate(|s| s.change_mount_point(device, mount_point))
    }

    fn get_mount_point(&self, device: &str) -> StorageResult<String> {
        Ok(self.volume(device)?.mount_point.clone().unwrap_or_default())
    }

    fn change_mount_by(&mut self, device: &str, mount_by: MountBy) -> StorageResult<()> {
        self.mutate(|s| s.change_mount_by(device, mount_by))
    }

    fn get_mount_by(&self, device: &str) -> StorageResult<MountBy> {
        Ok(self.volume(device)?.mount_by)
    }

    fn change_fstab_options(&mut self, device: &str, options: &str) -> StorageResult<()> {
        self.mutate(|s| s.edit_fstab_options(device, |o| o.replace(options)))
    }

    fn get_fstab_options(&self, device: &str) -> StorageResult<String> {
        Ok(self.volume(device)?.fstab_options.to_string())
    }

    fn add_fstab_options(&mut self, device: &str, options: &str) -> StorageResult<()> {
        self.mutate(|s| s.edit_fstab_options(device, |o| o.add(options)))
    }

    fn remove_fstab_options(&mut self, device: &str, patterns: &str) -> StorageResult<()> {
        self.mutate(|s| {
            s.edit_fstab_options(device, |o| {
                let removed = o.remove(patterns);
                debug!("Removed {} fstab option(s) of {}", removed, device);
            })
        })
    }

    fn set_crypt_password(&mut self, device: &str, password: &str) -> StorageResult<()> {
        self.mutate(|s| s.set_crypt_password(device, password))
    }

    fn set_crypt(&mut self, device: &str, encrypt: bool) -> StorageResult<()> {
        self.mutate(|s| s.set_crypt(device, encrypt))
    }

    fn get_crypt(&self, device: &str) -> StorageResult<bool> {
        Ok(self.volume(device)?.encryption.is_encrypted())
    }

    fn resize_volume(&mut self, device: &str, new_size_mb: u64) -> StorageResult<()> {
        self.mutate(|s| s.resize_volume(device, new_size_mb.saturating_mul(1024)))
    }

    fn create_lvm_vg(
        &mut self,
        name: &str,
        pe_size_k: u64,
        lvm1: bool,
        devices: &[&str],
    ) -> StorageResult<()> {
        self.mutate(|s| s.create_lvm_vg(name, pe_size_k, lvm1, devices))
    }

    fn remove_lvm_vg(&mut self, name: &str) -> StorageResult<()> {
        self.mutate(|s| s.remove_lvm_vg(name))
    }

    fn extend_lvm_vg(&mut self, name: &str, devices: &[&str]) -> StorageResult<()> {
        self.mutate(|s| s.extend_lvm_vg(name, devices))
    }

    fn shrink_lvm_vg(&mut self, name: &str, devices: &[&str]) -> StorageResult<()> {
        self.mutate(|s| s.shrink_lvm_vg(name, devices))
    }

    fn create_lvm_lv(
        &mut self,
        vg: &str,
        name: &str,
        size_mb: u64,
        stripes: u32,
    ) -> StorageResult<String> {
        self.mutate(|s| s.create_lvm_lv(vg, name, size_mb.saturating_mul(1024), stripes))
    }

    fn remove_lvm_lv(&mut self, device: &str) -> StorageResult<()> {
        self.mutate(|s| s.remove_lvm_lv(device))
    }

    fn remove_lvm_lv_by_name(&mut self, vg: &str, name: &str) -> StorageResult<()> {
        self.mutate(|s| s.remove_lvm_lv_by_name(vg, name))
    }

    fn get_commit_actions(&self, mark_destructive: bool) -> Vec<String> {
        self.ordered()
            .into_iter()
            .map(|pending| {
                let text = pending.action.describe();
                if mark_destructive && pending.action.is_destructive() {
                    format!("{DESTRUCTIVE_MARK}{text}")
                } else {
                    text
                }
            })
            .collect()
    }

    fn pending_actions(&self) -> Vec<ActionRecord> {
        self.ordered().into_iter().map(PendingAction::record).collect()
    }

    fn set_progress_handler(&mut self, handler: Option<Box<dyn ProgressHandler>>) {
        self.progress = handler;
    }

    fn has_progress_handler(&self) -> bool {
        self.progress.is_some()
    }

    fn set_cache_changes(&mut self, cache: bool) -> StorageResult<()> {
        let flush = self.cache_changes && !cache && self.staging.has_pending();
        if flush {
            info!("Caching turned off, committing queued actions");
            if let Err(e) = self.commit() {
                if e.as_partial().is_some() {
                    self.cache_changes = cache;
                } else {
                    debug!("Queued actions kept, caching stays on: {}", e);
                }
                return Err(e);
            }
        }
        self.cache_changes = cache;
        Ok(())
    }

    fn is_cache_changes(&self) -> bool {
        self.cache_changes
    }

    fn commit(&mut self) -> StorageResult<CommitReport> {
        let sink = ProgressSink::new(self.progress.as_deref_mut());
        Committer::new(
            &mut *self.runner,
            &mut *self.table,
            sink,
            self.min_password_len,
        )
        .commit(&mut self.staging)
    }
}

fn describe_volume(volume: &Volume) -> String {
    let mut parts = vec![volume.effective_fs().as_str().to_string()];
    if volume.format {
        parts.push("(format)".to_string());
    }
    if let Some(label) = &volume.label {
        parts.push(format!("label={label}"));
    }
    if let Some(mount_point) = &volume.mount_point {
        parts.push(format!("mount={mount_point}"));
    }
    if volume.encryption.is_encrypted() {
        parts.push("encrypted".to_string());
    }
    if volume.used_by.is_used() {
        parts.push(format!("used_by={:?}", volume.used_by));
    }
    parts.join(" ")
}
