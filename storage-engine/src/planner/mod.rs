// SPDX-License-Identifier: GPL-3.0-only

//! Action planner
//!
//! [`Staging`] keeps two models: `committed`, the system as it is, and
//! `staged`, the system as it will be once every pending action ran.
//! Requests are validated against the staged model. A request either
//! succeeds completely or leaves both the staged model and the queue
//! exactly as they were.
//!
//! Attribute edits (format, label, mount settings) mutate the staged
//! volume and are then folded into at most one pending action per kind
//! and volume. An edit that restores the committed state drops the
//! action again.

pub mod order;
mod space;

use storage_contracts::{
    ContainerError, DiskError, FstabError, LvmError, ManagerError, StorageError, StorageResult,
    VolumeError,
};
use storage_types::{
    DeviceModel, EncryptType, FsCapabilities, FsType, FstabOptions, LogicalVolume, MountBy,
    Partition, PartitionTable, PartitionType, Region, Secret, Volume, ids, is_valid_lvm_name,
};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionKind, PendingAction};

pub use order::{Schedule, schedule};

/// Smallest physical extent LVM accepts
pub const MIN_PE_SIZE_K: u64 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Partition {
        disk: String,
        kind: PartitionType,
    },
    LogicalVolume {
        vg: String,
    },
}

impl Target {
    fn is_extended(&self) -> bool {
        matches!(
            self,
            Target::Partition {
                kind: PartitionType::Extended,
                ..
            }
        )
    }
}

fn internal(what: &str) -> StorageError {
    warn!("Staged model lost track of {}", what);
    ContainerError::InternalError.into()
}

fn non_empty(text: &str) -> Option<String> {
    Some(text.trim()).filter(|t| !t.is_empty()).map(str::to_string)
}

/// Filesystem checks for a resize that keeps the data on the volume
fn check_fs_resize(volume: &Volume, grow: bool, new_size_k: u64) -> StorageResult<()> {
    let fs = volume.effective_fs();
    if volume.format || !fs.has_filesystem() {
        return Ok(());
    }
    if volume.encryption.is_encrypted() {
        return Err(VolumeError::ResizeUnsupportedByContainer.into());
    }
    let caps = FsCapabilities::for_fs(fs).ok_or(VolumeError::ResizeUnsupportedByFs)?;
    if !caps.can_resize(grow, volume.mounted) {
        return Err(VolumeError::ResizeUnsupportedByFs.into());
    }
    if caps.resize_needs_mount && volume.mount_point.as_deref().is_none_or(str::is_empty) {
        return Err(VolumeError::ResizeUnsupportedByFs.into());
    }
    if new_size_k < caps.minimal_fs_size_k {
        return Err(VolumeError::ResizeTooSmall.into());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Staging {
    pub(crate) committed: DeviceModel,
    pub(crate) staged: DeviceModel,
    pub(crate) pending: Vec<PendingAction>,
    next_seq: u64,
}

impl Staging {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            staged: model.clone(),
            committed: model,
            pending: Vec::new(),
            next_seq: 1,
        }
    }

    /// The system as last detected or committed
    pub fn committed(&self) -> &DeviceModel {
        &self.committed
    }

    /// The system once every pending action ran
    pub fn staged(&self) -> &DeviceModel {
        &self.staged
    }

    pub fn pending(&self) -> &[PendingAction] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn schedule(&self) -> StorageResult<Schedule> {
        order::schedule(&self.pending)
    }

    /// Reject encrypted formats whose password is missing or too short.
    pub fn finalize(&self, min_password_len: usize) -> StorageResult<()> {
        for pending in &self.pending {
            if let Action::Format {
                device,
                encryption,
                password,
                ..
            } = &pending.action
                && encryption.is_encrypted()
            {
                let Some(password) = password.as_ref().filter(|p| !p.is_empty()) else {
                    warn!("No crypt password set for {}", device);
                    return Err(VolumeError::CryptNoPwd.into());
                };
                if password.len() < min_password_len {
                    warn!("Crypt password for {} is too short", device);
                    return Err(VolumeError::CryptPwdTooShort.into());
                }
            }
        }
        Ok(())
    }

    /// Run `change`, then verify the queue still has a commit order.
    /// Any failure restores the state from before the call.
    fn transact<T>(
        &mut self,
        change: impl FnOnce(&mut Self) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let snapshot = (self.staged.clone(), self.pending.clone(), self.next_seq);
        let result = change(self).and_then(|value| {
            order::schedule(&self.pending)?;
            Ok(value)
        });
        if let Err(e) = &result {
            debug!("Request rejected: {}", e);
            (self.staged, self.pending, self.next_seq) = snapshot;
        }
        result
    }

    fn push(&mut self, action: Action) -> StorageResult<()> {
        action.apply(&mut self.staged)?;
        self.enqueue(action);
        Ok(())
    }

    /// Queue an action whose effect is already in the staged model
    fn enqueue(&mut self, action: Action) {
        let pending = PendingAction {
            seq: self.next_seq,
            action,
        };
        self.next_seq += 1;
        info!("Planned {}", pending);
        self.pending.push(pending);
    }

    /// Replace, add or drop the pending `kind` action of `device`.
    /// A replaced action keeps its position in planning order.
    fn upsert(&mut self, device: &str, kind: ActionKind, action: Option<Action>) {
        let position = self
            .pending
            .iter()
            .position(|p| p.action.kind() == kind && p.action.device() == Some(device));
        match (position, action) {
            (Some(index), Some(action)) => {
                self.pending[index].action = action;
                debug!("Updated {}", self.pending[index]);
            }
            (None, Some(action)) => self.enqueue(action),
            (Some(index), None) => {
                let dropped = self.pending.remove(index);
                debug!("Dropped {}, nothing left to change", dropped);
            }
            (None, None) => {}
        }
    }

    /// Drop every pending action `cancel` selects and replay the rest.
    fn cancel(&mut self, cancel: impl Fn(&PendingAction) -> bool) -> StorageResult<()> {
        self.pending.retain(|pending| {
            let drop = cancel(pending);
            if drop {
                info!("Cancelled {}", pending);
            }
            !drop
        });
        self.rebuild()
    }

    /// Recompute the staged model from the committed one and the queue.
    pub(crate) fn rebuild(&mut self) -> StorageResult<()> {
        let mut staged = self.committed.clone();
        for pending in &self.pending {
            pending.action.apply(&mut staged)?;
        }
        self.staged = staged;
        Ok(())
    }

    /// Sequence number of the pending action that creates `device`
    fn created_at(&self, device: &str) -> Option<u64> {
        self.pending
            .iter()
            .rev()
            .find(|p| {
                matches!(
                    p.action.kind(),
                    ActionKind::CreatePartition | ActionKind::CreateLv
                ) && p.action.device() == Some(device)
            })
            .map(|p| p.seq)
    }

    fn created_vg_at(&self, name: &str) -> Option<u64> {
        self.pending
            .iter()
            .rev()
            .find(|p| matches!(&p.action, Action::CreateVg { name: n, .. } if n == name))
            .map(|p| p.seq)
    }

    fn target(&self, device: &str) -> StorageResult<Target> {
        if let Some((disk, partition)) = self.staged.partition(device) {
            return Ok(Target::Partition {
                disk: disk.device.clone(),
                kind: partition.kind,
            });
        }
        if let Some((vg, _)) = self.staged.logical_volume(device) {
            return Ok(Target::LogicalVolume {
                vg: vg.name.clone(),
            });
        }
        Err(ManagerError::VolumeNotFound.into())
    }

    fn vg_read_only(&self, vg: &str) -> bool {
        self.staged.volume_group(vg).is_some_and(|group| {
            group.physical_volumes.iter().any(|pv| {
                self.staged
                    .disk_of_partition(&pv.device)
                    .is_some_and(|disk| disk.read_only)
            })
        })
    }

    fn check_writable(&self, target: &Target) -> StorageResult<()> {
        match target {
            Target::Partition { disk, .. } => {
                if self.staged.disk(disk).is_some_and(|d| d.read_only) {
                    return Err(DiskError::ChangeReadonly.into());
                }
            }
            Target::LogicalVolume { vg } => {
                if self.vg_read_only(vg) {
                    return Err(LvmError::ChangeReadonly.into());
                }
            }
        }
        Ok(())
    }

    /// Resolve a volume for an attribute edit.
    fn editable(&self, device: &str) -> StorageResult<(Target, Volume)> {
        let target = self.target(device)?;
        self.check_writable(&target)?;
        let volume = self
            .staged
            .volume(device)
            .cloned()
            .ok_or_else(|| internal(device))?;
        Ok((target, volume))
    }

    fn volume_mut(&mut self, device: &str) -> StorageResult<&mut Volume> {
        self.staged
            .volume_mut(device)
            .ok_or_else(|| internal(device))
    }

    fn partition_mut(&mut self, device: &str) -> StorageResult<&mut Partition> {
        self.staged
            .disks
            .iter_mut()
            .find_map(|d| d.partition_by_device_mut(device))
            .ok_or_else(|| internal(device))
    }

    /// Attributes `device` has before any pending action
    fn baseline(&self, device: &str, size_k: u64) -> Volume {
        self.committed
            .volume(device)
            .filter(|_| self.created_at(device).is_none())
            .cloned()
            .unwrap_or_else(|| Volume::detected(size_k, FsType::None))
    }

    /// Fold the staged attributes of `device` into its pending format,
    /// label and mount-table actions.
    fn sync_volume(&mut self, device: &str) -> StorageResult<()> {
        let volume = self
            .staged
            .volume(device)
            .cloned()
            .ok_or_else(|| internal(device))?;
        let baseline = self.baseline(device, volume.size_k);

        let format = volume.format.then(|| Action::Format {
            device: device.to_string(),
            fs: volume.fs,
            label: volume.label.clone(),
            encryption: volume.encryption,
            password: volume.password.clone(),
        });
        self.upsert(device, ActionKind::Format, format);

        let relabel = (!volume.format && volume.label != baseline.label).then(|| {
            Action::SetLabel {
                device: device.to_string(),
                fs: volume.effective_fs(),
                label: volume.label.clone(),
            }
        });
        self.upsert(device, ActionKind::SetLabel, relabel);

        // The entry also carries the filesystem type and the identity it
        // is mounted by.
        let identity_changed = match volume.mount_by {
            MountBy::Device => false,
            MountBy::Uuid => volume.format,
            MountBy::Label => volume.label != baseline.label,
        };
        let changed = volume.mount_point != baseline.mount_point
            || volume.mount_by != baseline.mount_by
            || volume.fstab_options != baseline.fstab_options
            || volume.effective_fs() != baseline.effective_fs()
            || volume.encryption.is_encrypted() != baseline.encryption.is_encrypted()
            || identity_changed;
        let listed = volume.mount_point.is_some() || baseline.mount_point.is_some();
        let mount = (changed && listed).then(|| Action::MountTable {
            device: device.to_string(),
            mount_point: volume.mount_point.clone(),
            mount_by: volume.mount_by,
            options: volume.fstab_options.clone(),
        });
        self.upsert(device, ActionKind::MountTable, mount);
        Ok(())
    }

    // Partitions

    pub fn create_partition(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start: u64,
        len: u64,
    ) -> StorageResult<String> {
        self.transact(|s| s.add_partition(disk, kind, Region::new(start, len)))
    }

    fn add_partition(
        &mut self,
        disk: &str,
        kind: PartitionType,
        region: Region,
    ) -> StorageResult<String> {
        let disk = self.staged.disk(disk).ok_or(ManagerError::DiskNotFound)?;
        if disk.read_only {
            return Err(DiskError::ChangeReadonly.into());
        }
        if kind == PartitionType::Extended {
            if !disk.label.supports_extended() {
                return Err(DiskError::CreatePartitionExtImpossible.into());
            }
            if disk.extended().is_some() {
                return Err(DiskError::CreatePartitionExtOnlyOnce.into());
            }
        }
        if region.is_empty() {
            return Err(DiskError::CreatePartitionZeroSize.into());
        }
        if !region.fits_within(disk.cylinders) {
            return Err(DiskError::CreatePartitionExceedsDisk.into());
        }
        if kind == PartitionType::Logical {
            let extended = disk
                .extended()
                .ok_or(DiskError::CreatePartitionLogicalNoExt)?;
            if !extended.region.contains(&region) {
                return Err(DiskError::CreatePartitionLogicalOutsideExt.into());
            }
        }
        if let Some(existing) = disk.overlapping(&region, kind) {
            debug!("{} overlaps {} at {}", region, existing.device, existing.region);
            return Err(DiskError::CreatePartitionOverlapsExisting.into());
        }
        let number = match kind {
            PartitionType::Logical => Some(disk.next_logical_number()),
            _ => disk.free_primary_number(),
        }
        .ok_or(DiskError::CreatePartitionNoFreeNumber)?;

        let device = disk.partition_device_name(number);
        let action = Action::CreatePartition {
            disk: disk.device.clone(),
            device: device.clone(),
            number,
            kind,
            region,
            id: if kind == PartitionType::Extended {
                ids::EXTENDED
            } else {
                ids::LINUX
            },
            size_k: disk.cylinder_to_kb(region.len),
        };
        self.push(action)?;
        Ok(device)
    }

    pub fn create_partition_kb(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start_k: u64,
        size_k: u64,
    ) -> StorageResult<String> {
        let found = self.staged.disk(disk).ok_or(ManagerError::DiskNotFound)?;
        let cyl_k = found.cylinder_to_kb(1).max(1);
        let region = Region::new(start_k / cyl_k, found.kb_to_cylinder(size_k));
        self.create_partition(disk, kind, region.start, region.len)
    }

    /// Create a partition of `size_k` in the first free region it fits:
    /// a primary if a number is free, else a logical.
    pub fn create_partition_any(&mut self, disk: &str, size_k: u64) -> StorageResult<String> {
        let found = self.staged.disk(disk).ok_or(ManagerError::DiskNotFound)?;
        if found.read_only {
            return Err(DiskError::ChangeReadonly.into());
        }
        let len = found.kb_to_cylinder(size_k);
        if len == 0 {
            return Err(DiskError::CreatePartitionZeroSize.into());
        }
        let first_fit = |regions: Vec<Region>| {
            regions
                .into_iter()
                .find(|r| r.len >= len)
                .map(|r| Region::new(r.start, len))
        };
        let primary = found
            .free_primary_number()
            .and_then(|_| first_fit(found.free_regions()));
        let logical = first_fit(found.free_logical_regions());
        let (kind, region) = match (primary, logical) {
            (Some(region), _) => (PartitionType::Primary, region),
            (None, Some(region)) => (PartitionType::Logical, region),
            (None, None) if found.free_primary_number().is_none() && found.extended().is_none() => {
                return Err(DiskError::CreatePartitionNoFreeNumber.into());
            }
            (None, None) => return Err(DiskError::CreatePartitionNoSpace.into()),
        };
        self.create_partition(disk, kind, region.start, region.len)
    }

    pub fn remove_partition(&mut self, device: &str) -> StorageResult<()> {
        self.transact(|s| s.drop_partition(device))
    }

    fn drop_partition(&mut self, device: &str) -> StorageResult<()> {
        let Some((disk, partition)) = self.staged.partition(device) else {
            if self.staged.logical_volume(device).is_some() {
                return Err(ManagerError::RemovePartitionInvalidContainer.into());
            }
            return Err(DiskError::RemovePartitionNotFound.into());
        };
        if disk.read_only {
            return Err(DiskError::ChangeReadonly.into());
        }
        if partition.volume.used_by.is_used() {
            return Err(DiskError::RemovePartitionUsedBy.into());
        }

        let mut logicals = Vec::new();
        match partition.kind {
            PartitionType::Logical => {
                if disk.logicals().any(|p| p.number > partition.number) {
                    return Err(DiskError::RemovePartitionLogicalRenumber.into());
                }
            }
            PartitionType::Extended => {
                let mut inner: Vec<&Partition> = disk.logicals().collect();
                if inner.iter().any(|p| p.volume.used_by.is_used()) {
                    return Err(DiskError::RemovePartitionUsedBy.into());
                }
                inner.sort_by_key(|p| std::cmp::Reverse(p.number));
                logicals = inner.into_iter().map(|p| p.device.clone()).collect();
            }
            PartitionType::Primary => {}
        }

        for logical in logicals {
            self.remove_one_partition(&logical)?;
        }
        self.remove_one_partition(device)
    }

    fn remove_one_partition(&mut self, device: &str) -> StorageResult<()> {
        if let Some(created) = self.created_at(device) {
            return self.cancel(|p| p.seq >= created && p.action.device() == Some(device));
        }
        self.cancel(|p| p.action.device() == Some(device))?;
        let (disk, partition) = self
            .staged
            .partition(device)
            .ok_or_else(|| internal(device))?;
        let action = Action::RemovePartition {
            disk: disk.device.clone(),
            device: device.to_string(),
            number: partition.number,
            kind: partition.kind,
            region: partition.region,
        };
        self.push(action)
    }

    pub fn change_partition_id(&mut self, device: &str, id: u32) -> StorageResult<()> {
        self.transact(|s| {
            let Some((disk, partition)) = s.staged.partition(device) else {
                if s.staged.logical_volume(device).is_some() {
                    return Err(ManagerError::ChangePartitionIdInvalidContainer.into());
                }
                return Err(DiskError::ChangePartitionIdNotFound.into());
            };
            if disk.read_only {
                return Err(DiskError::ChangeReadonly.into());
            }
            if partition.is_extended() || ids::is_extended(id) {
                return Err(DiskError::SetTypeInvalidVolume.into());
            }
            let disk = disk.device.clone();
            let number = partition.number;

            if let Some(created) = s.created_at(device) {
                for pending in s.pending.iter_mut().filter(|p| p.seq == created) {
                    if let Action::CreatePartition { id: planned, .. } = &mut pending.action {
                        *planned = id;
                    }
                }
            } else {
                let current = s.committed.partition(device).map(|(_, p)| p.id);
                let action = (current != Some(id)).then(|| Action::ChangePartitionId {
                    disk,
                    device: device.to_string(),
                    number,
                    id,
                });
                s.upsert(device, ActionKind::ChangePartitionId, action);
            }
            s.partition_mut(device)?.id = id;
            Ok(())
        })
    }

    pub fn destroy_partition_table(&mut self, disk: &str, label: &str) -> StorageResult<()> {
        let label: PartitionTable = label
            .parse()
            .map_err(|_| DiskError::DestroyTableInvalidLabel)?;
        self.transact(|s| {
            let found = s.staged.disk(disk).ok_or(ManagerError::DiskNotFound)?;
            if found.read_only {
                return Err(DiskError::ChangeReadonly.into());
            }
            if found.partitions.iter().any(|p| p.volume.used_by.is_used()) {
                return Err(ManagerError::DiskUsedBy.into());
            }
            let mut devices: Vec<String> =
                found.partitions.iter().map(|p| p.device.clone()).collect();
            if let Some(committed) = s.committed.disk(disk) {
                devices.extend(committed.partitions.iter().map(|p| p.device.clone()));
            }
            s.cancel(|p| {
                p.action.disk() == Some(disk)
                    || p
                        .action
                        .device()
                        .is_some_and(|d| devices.iter().any(|x| x == d))
            })?;
            s.push(Action::DestroyPartitionTable {
                disk: disk.to_string(),
                label,
            })
        })
    }

    // Volumes

    pub fn change_format_volume(
        &mut self,
        device: &str,
        format: bool,
        fs: FsType,
    ) -> StorageResult<()> {
        self.transact(|s| {
            let (target, volume) = s.editable(device)?;
            if target.is_extended() {
                return Err(VolumeError::FormatExtendedUnsupported.into());
            }
            if volume.used_by.is_used() {
                return Err(VolumeError::AlreadyInUse.into());
            }

            if format {
                let caps = FsCapabilities::for_fs(fs).ok_or(VolumeError::FormatUnknownFs)?;
                if volume.size_k < caps.minimal_fs_size_k {
                    return Err(VolumeError::FormatFsTooSmall.into());
                }
                let v = s.volume_mut(device)?;
                v.format = true;
                v.fs = fs;
                v.uuid = None;
                if v.encryption.is_encrypted() {
                    v.encryption = EncryptType::Luks;
                }
                let label_fits = v
                    .label
                    .as_ref()
                    .is_none_or(|l| caps.supports_label && l.chars().count() <= caps.label_length as usize);
                if !label_fits {
                    v.label = None;
                }
                let mount_by_fits = match v.mount_by {
                    MountBy::Device => true,
                    MountBy::Uuid => caps.supports_uuid,
                    MountBy::Label => caps.supports_label,
                };
                if !mount_by_fits {
                    v.mount_by = MountBy::Device;
                }
            } else {
                let baseline = s.baseline(device, volume.size_k);
                let v = s.volume_mut(device)?;
                v.format = false;
                v.fs = baseline.fs;
                v.uuid = baseline.uuid;
                v.label = baseline.label;
                v.encryption = baseline.encryption;
                v.password = None;
            }
            s.sync_volume(device)
        })
    }

    pub fn change_label(&mut self, device: &str, label: &str) -> StorageResult<()> {
        self.transact(|s| {
            let (_, volume) = s.editable(device)?;
            if volume.used_by.is_used() {
                return Err(VolumeError::AlreadyInUse.into());
            }
            let caps = FsCapabilities::for_fs(volume.effective_fs())
                .filter(|caps| caps.supports_label)
                .ok_or(VolumeError::LabelNotSupported)?;
            if label.chars().count() > caps.label_length as usize {
                return Err(VolumeError::LabelTooLong.into());
            }
            if !volume.format && volume.mounted && !caps.label_while_mounted {
                return Err(VolumeError::LabelWhileMounted.into());
            }
            s.volume_mut(device)?.label = non_empty(label);
            s.sync_volume(device)
        })
    }

    pub fn change_mount_point(&mut self, device: &str, mount_point: &str) -> StorageResult<()> {
        self.transact(|s| {
            let (target, volume) = s.editable(device)?;
            if target.is_extended() {
                return Err(VolumeError::MountExtendedUnsupported.into());
            }
            if volume.used_by.is_used() {
                return Err(VolumeError::AlreadyInUse.into());
            }
            let mount_point = non_empty(mount_point);
            if let Some(mp) = mount_point.as_deref() {
                let swap = mp == "swap" && volume.effective_fs() == FsType::Swap;
                if !swap && !mp.starts_with('/') {
                    return Err(VolumeError::MountPointInvalid.into());
                }
                let taken = s
                    .staged
                    .volumes()
                    .any(|(other, v)| other != device && v.mount_point.as_deref() == Some(mp));
                if !swap && taken {
                    return Err(FstabError::AddEntryFound.into());
                }
            }
            s.volume_mut(device)?.mount_point = mount_point;
            s.sync_volume(device)
        })
    }

    pub fn change_mount_by(&mut self, device: &str, mount_by: MountBy) -> StorageResult<()> {
        self.transact(|s| {
            let (target, volume) = s.editable(device)?;
            if target.is_extended() {
                return Err(VolumeError::MountExtendedUnsupported.into());
            }
            if mount_by != MountBy::Device
                && volume.encryption.is_encrypted()
                && volume.encryption != EncryptType::Luks
            {
                return Err(VolumeError::MountbyNotEncrypted.into());
            }
            let caps = FsCapabilities::for_fs(volume.effective_fs());
            let supported = match mount_by {
                MountBy::Device => true,
                MountBy::Uuid => caps.is_some_and(|c| c.supports_uuid),
                MountBy::Label => caps.is_some_and(|c| c.supports_label),
            };
            if !supported {
                return Err(VolumeError::MountbyUnsupportedByFs.into());
            }
            s.volume_mut(device)?.mount_by = mount_by;
            s.sync_volume(device)
        })
    }

    /// Edit the fstab option set of `device` through `edit`
    pub fn edit_fstab_options(
        &mut self,
        device: &str,
        edit: impl FnOnce(&mut FstabOptions),
    ) -> StorageResult<()> {
        self.transact(|s| {
            let (target, _) = s.editable(device)?;
            if target.is_extended() {
                return Err(VolumeError::MountExtendedUnsupported.into());
            }
            edit(&mut s.volume_mut(device)?.fstab_options);
            s.sync_volume(device)
        })
    }

    pub fn set_crypt(&mut self, device: &str, encrypt: bool) -> StorageResult<()> {
        self.transact(|s| {
            let (target, volume) = s.editable(device)?;
            if target.is_extended() {
                return Err(VolumeError::FormatExtendedUnsupported.into());
            }
            if volume.used_by.is_used() {
                return Err(VolumeError::AlreadyInUse.into());
            }
            if !volume.format {
                if encrypt != volume.encryption.is_encrypted() {
                    return Err(VolumeError::CryptFormatRequired.into());
                }
                return Ok(());
            }
            let v = s.volume_mut(device)?;
            if encrypt {
                v.encryption = EncryptType::Luks;
                if v.mount_by == MountBy::Label {
                    v.mount_by = MountBy::Device;
                }
            } else {
                v.encryption = EncryptType::None;
                v.password = None;
            }
            s.sync_volume(device)
        })
    }

    pub fn set_crypt_password(&mut self, device: &str, password: &str) -> StorageResult<()> {
        self.transact(|s| {
            s.editable(device)?;
            s.volume_mut(device)?.password =
                Some(password).filter(|p| !p.is_empty()).map(Secret::new);
            s.sync_volume(device)
        })
    }

    pub fn resize_volume(&mut self, device: &str, new_size_k: u64) -> StorageResult<()> {
        self.transact(|s| match s.editable(device)? {
            (Target::Partition { .. }, volume) => s.resize_partition(device, &volume, new_size_k),
            (Target::LogicalVolume { .. }, volume) => s.resize_lv(device, &volume, new_size_k),
        })
    }

    fn resize_partition(
        &mut self,
        device: &str,
        volume: &Volume,
        new_size_k: u64,
    ) -> StorageResult<()> {
        let (disk, partition) = self
            .staged
            .partition(device)
            .ok_or_else(|| internal(device))?;
        if partition.is_extended() {
            return Err(DiskError::ResizePartitionInvalidVolume.into());
        }
        if volume.used_by.is_used() {
            return Err(VolumeError::ResizeUnsupportedByContainer.into());
        }
        let len = disk.kb_to_cylinder(new_size_k);
        if len == 0 {
            return Err(VolumeError::ResizeTooSmall.into());
        }
        let from = partition.region;
        let to = Region::new(from.start, len);
        if to == from {
            return Ok(());
        }
        let grow = to.len > from.len;
        if grow {
            let collides = disk.partitions.iter().any(|p| {
                p.number != partition.number
                    && p.is_logical() == partition.is_logical()
                    && p.region.overlaps(&to)
            });
            let escapes = partition.is_logical()
                && disk.extended().is_some_and(|ext| !ext.region.contains(&to));
            if collides || escapes || !to.fits_within(disk.cylinders) {
                return Err(DiskError::ResizeNoSpace.into());
            }
        }
        let size_k = disk.cylinder_to_kb(len);
        check_fs_resize(volume, grow, size_k)?;

        let disk = disk.device.clone();
        let (number, kind) = (partition.number, partition.kind);
        if let Some(created) = self.created_at(device) {
            for pending in self.pending.iter_mut().filter(|p| p.seq == created) {
                if let Action::CreatePartition {
                    region,
                    size_k: planned,
                    ..
                } = &mut pending.action
                {
                    *region = to;
                    *planned = size_k;
                }
            }
        } else {
            let committed = self
                .committed
                .partition(device)
                .map(|(_, p)| p.region)
                .ok_or_else(|| internal(device))?;
            let action = (to != committed).then(|| Action::ResizePartition {
                disk,
                device: device.to_string(),
                number,
                kind,
                from: committed,
                to,
                size_k,
            });
            self.upsert(device, ActionKind::ResizePartition, action);
        }
        let partition = self.partition_mut(device)?;
        partition.region = to;
        partition.volume.size_k = size_k;
        Ok(())
    }

    fn resize_lv(&mut self, device: &str, volume: &Volume, new_size_k: u64) -> StorageResult<()> {
        let (vg, lv) = self
            .staged
            .logical_volume(device)
            .ok_or_else(|| internal(device))?;
        let to = vg.size_to_extents(new_size_k);
        if to == 0 {
            return Err(LvmError::ResizeLvInvalidVolume.into());
        }
        let from = lv.extents;
        if to == from {
            return Ok(());
        }
        let grow = to > from;
        if grow && to - from > vg.free_pe() {
            return Err(LvmError::LvNoSpace.into());
        }
        let size_k = vg.extents_to_kb(to);
        check_fs_resize(volume, grow, size_k)?;

        let (vg_name, name) = (vg.name.clone(), lv.name.clone());
        if let Some(created) = self.created_at(device) {
            for pending in self.pending.iter_mut().filter(|p| p.seq == created) {
                if let Action::CreateLv {
                    extents,
                    size_k: planned,
                    ..
                } = &mut pending.action
                {
                    *extents = to;
                    *planned = size_k;
                }
            }
        } else {
            let committed = self
                .committed
                .logical_volume(device)
                .map(|(_, lv)| lv.extents)
                .ok_or_else(|| internal(device))?;
            let action = (to != committed).then(|| Action::ResizeLv {
                vg: vg_name.clone(),
                name: name.clone(),
                device: device.to_string(),
                from: committed,
                to,
                size_k,
            });
            self.upsert(device, ActionKind::ResizeLv, action);
        }
        let lv = self
            .staged
            .volume_group_mut(&vg_name)
            .and_then(|g| g.logical_volumes.iter_mut().find(|lv| lv.name == name))
            .ok_or_else(|| internal(device))?;
        lv.extents = to;
        lv.volume.size_k = size_k;
        Ok(())
    }

    // LVM

    fn check_physical_volume(&self, device: &str, earlier: &[&str]) -> StorageResult<()> {
        if self.staged.logical_volume(device).is_some() {
            return Err(ManagerError::LvmInvalidDevice.into());
        }
        let (disk, partition) = self
            .staged
            .partition(device)
            .ok_or(LvmError::PvDeviceUnknown)?;
        if partition.is_extended() {
            return Err(ManagerError::LvmInvalidDevice.into());
        }
        if disk.read_only {
            return Err(LvmError::ChangeReadonly.into());
        }
        let volume = &partition.volume;
        if volume.used_by.is_used() || earlier.contains(&device) {
            return Err(LvmError::PvAlreadyContained.into());
        }
        if volume.mounted || volume.mount_point.is_some() || volume.format {
            return Err(LvmError::PvDeviceUsed.into());
        }
        Ok(())
    }

    fn check_physical_volumes(&self, devices: &[&str]) -> StorageResult<Vec<String>> {
        if devices.is_empty() {
            return Err(LvmError::VgHasNonePv.into());
        }
        for (index, device) in devices.iter().enumerate() {
            self.check_physical_volume(device, &devices[..index])?;
        }
        Ok(devices.iter().map(|d| d.to_string()).collect())
    }

    pub fn create_lvm_vg(
        &mut self,
        name: &str,
        pe_size_k: u64,
        lvm1: bool,
        devices: &[&str],
    ) -> StorageResult<()> {
        self.transact(|s| {
            if !is_valid_lvm_name(name) {
                return Err(ManagerError::VgInvalidName.into());
            }
            if s.staged.volume_group(name).is_some() {
                return Err(ManagerError::LvmVgExists.into());
            }
            if pe_size_k < MIN_PE_SIZE_K || !pe_size_k.is_power_of_two() {
                return Err(LvmError::PeSizeInvalid.into());
            }
            let devices = s.check_physical_volumes(devices)?;
            s.push(Action::CreateVg {
                name: name.to_string(),
                pe_size_k,
                lvm1,
                devices,
            })
        })
    }

    fn writable_vg(&self, name: &str) -> StorageResult<()> {
        if self.staged.volume_group(name).is_none() {
            return Err(ManagerError::LvmVgNotFound.into());
        }
        if self.vg_read_only(name) {
            return Err(LvmError::ChangeReadonly.into());
        }
        Ok(())
    }

    pub fn remove_lvm_vg(&mut self, name: &str) -> StorageResult<()> {
        self.transact(|s| {
            s.writable_vg(name)?;
            let lvs: Vec<String> = s
                .staged
                .volume_group(name)
                .map(|vg| vg.logical_volumes.iter().map(|lv| lv.device.clone()).collect())
                .unwrap_or_default();

            if let Some(created) = s.created_vg_at(name) {
                return s.cancel(|p| {
                    p.seq >= created
                        && (p.action.volume_group() == Some(name)
                            || p.action.device().is_some_and(|d| lvs.iter().any(|x| x == d)))
                });
            }

            for lv in &lvs {
                s.remove_lv(lv)?;
            }
            let devices = s
                .staged
                .volume_group(name)
                .map(|vg| vg.physical_volumes.iter().map(|pv| pv.device.clone()).collect())
                .unwrap_or_default();
            s.push(Action::RemoveVg {
                name: name.to_string(),
                devices,
            })
        })
    }

    pub fn extend_lvm_vg(&mut self, name: &str, devices: &[&str]) -> StorageResult<()> {
        self.transact(|s| {
            s.writable_vg(name)?;
            let devices = s.check_physical_volumes(devices)?;
            s.push(Action::ExtendVg {
                name: name.to_string(),
                devices,
            })
        })
    }

    pub fn shrink_lvm_vg(&mut self, name: &str, devices: &[&str]) -> StorageResult<()> {
        self.transact(|s| {
            s.writable_vg(name)?;
            let vg = s
                .staged
                .volume_group(name)
                .ok_or(ManagerError::LvmVgNotFound)?;
            if devices.is_empty() || devices.iter().any(|d| !vg.has_device(d)) {
                return Err(LvmError::PvNotFound.into());
            }
            let remaining: Vec<u64> = vg
                .physical_volumes
                .iter()
                .filter(|pv| !devices.contains(&pv.device.as_str()))
                .map(|pv| pv.pe_count)
                .collect();
            if remaining.is_empty() {
                return Err(LvmError::VgHasNonePv.into());
            }
            if remaining.iter().sum::<u64>() < vg.used_pe() {
                return Err(LvmError::RemovePvSizeNeeded.into());
            }
            s.push(Action::ReduceVg {
                name: name.to_string(),
                devices: devices.iter().map(|d| d.to_string()).collect(),
            })
        })
    }

    pub fn create_lvm_lv(
        &mut self,
        vg: &str,
        name: &str,
        size_k: u64,
        stripes: u32,
    ) -> StorageResult<String> {
        self.transact(|s| {
            s.writable_vg(vg)?;
            let group = s.staged.volume_group(vg).ok_or(ManagerError::LvmVgNotFound)?;
            if !is_valid_lvm_name(name) {
                return Err(LvmError::LvInvalidName.into());
            }
            if group.lv(name).is_some() {
                return Err(LvmError::LvDuplicateName.into());
            }
            let extents = group.size_to_extents(size_k);
            if extents == 0 {
                return Err(LvmError::CreateLvInvalidVolume.into());
            }
            let stripes = stripes.max(1);
            if stripes as usize > group.physical_volumes.len() {
                return Err(LvmError::LvNoSpaceStriped.into());
            }
            if extents > group.free_pe() {
                return Err(LvmError::LvNoSpace.into());
            }
            let device = LogicalVolume::device_path(vg, name);
            let action = Action::CreateLv {
                vg: vg.to_string(),
                name: name.to_string(),
                device: device.clone(),
                extents,
                stripes,
                size_k: group.extents_to_kb(extents),
            };
            s.push(action)?;
            Ok(device)
        })
    }

    pub fn remove_lvm_lv(&mut self, device: &str) -> StorageResult<()> {
        self.transact(|s| {
            let (vg, _) = s
                .staged
                .logical_volume(device)
                .ok_or(ManagerError::VolumeNotFound)?;
            let vg = vg.name.clone();
            s.writable_vg(&vg)?;
            s.remove_lv(device)
        })
    }

    pub fn remove_lvm_lv_by_name(&mut self, vg: &str, name: &str) -> StorageResult<()> {
        let group = self
            .staged
            .volume_group(vg)
            .ok_or(ManagerError::LvmVgNotFound)?;
        let device = group
            .lv(name)
            .map(|lv| lv.device.clone())
            .ok_or(LvmError::LvUnknownName)?;
        self.remove_lvm_lv(&device)
    }

    fn remove_lv(&mut self, device: &str) -> StorageResult<()> {
        if let Some(created) = self.created_at(device) {
            return self.cancel(|p| p.seq >= created && p.action.device() == Some(device));
        }
        self.cancel(|p| p.action.device() == Some(device))?;
        let (vg, lv) = self
            .staged
            .logical_volume(device)
            .ok_or_else(|| internal(device))?;
        let action = Action::RemoveLv {
            vg: vg.name.clone(),
            name: lv.name.clone(),
            device: device.to_string(),
        };
        self.push(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_types::{Disk, PhysicalVolume, VolumeGroup};

    /// sda: 1000 cylinders of 1 MiB, sda1 ext4 on [0, 100) mounted at /boot
    fn model() -> DeviceModel {
        let mut disk = Disk::new("/dev/sda", 1024 * 1024, 1000, PartitionTable::Msdos);
        let mut volume = Volume::detected(100 * 1024, FsType::Ext4);
        volume.mount_point = Some("/boot".to_string());
        volume.mounted = true;
        disk.insert_partition(Partition {
            device: "/dev/sda1".to_string(),
            number: 1,
            kind: PartitionType::Primary,
            region: Region::new(0, 100),
            id: ids::LINUX,
            volume,
        });
        DeviceModel {
            disks: vec![disk],
            volume_groups: Vec::new(),
        }
    }

    fn kinds(staging: &Staging) -> Vec<ActionKind> {
        staging.pending().iter().map(|p| p.action.kind()).collect()
    }

    #[test]
    fn create_partition_validates_geometry() {
        let mut staging = Staging::new(model());
        let device = staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("free space");
        assert_eq!(device, "/dev/sda2");

        let err = |r: StorageResult<String>| r.expect_err("rejected");
        assert_eq!(
            err(staging.create_partition("/dev/sda", PartitionType::Primary, 50, 10)),
            DiskError::CreatePartitionOverlapsExisting.into()
        );
        assert_eq!(
            err(staging.create_partition("/dev/sda", PartitionType::Primary, 990, 20)),
            DiskError::CreatePartitionExceedsDisk.into()
        );
        assert_eq!(
            err(staging.create_partition("/dev/sda", PartitionType::Primary, 500, 0)),
            DiskError::CreatePartitionZeroSize.into()
        );
        assert_eq!(
            err(staging.create_partition("/dev/sda", PartitionType::Logical, 500, 10)),
            DiskError::CreatePartitionLogicalNoExt.into()
        );
        assert_eq!(
            err(staging.create_partition("/dev/sdz", PartitionType::Primary, 0, 10)),
            ManagerError::DiskNotFound.into()
        );
        assert_eq!(staging.pending().len(), 1);
    }

    #[test]
    fn extended_partition_exists_once() {
        let mut staging = Staging::new(model());
        staging
            .create_partition("/dev/sda", PartitionType::Extended, 500, 400)
            .expect("extended");
        assert_eq!(
            staging.create_partition("/dev/sda", PartitionType::Extended, 100, 10),
            Err(DiskError::CreatePartitionExtOnlyOnce.into())
        );
        assert_eq!(
            staging.create_partition("/dev/sda", PartitionType::Logical, 950, 10),
            Err(DiskError::CreatePartitionLogicalOutsideExt.into())
        );
        let logical = staging
            .create_partition("/dev/sda", PartitionType::Logical, 500, 50)
            .expect("logical inside");
        assert_eq!(logical, "/dev/sda5");
    }

    #[test]
    fn removing_a_new_partition_cancels_its_actions() {
        let mut staging = Staging::new(model());
        let device = staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("create");
        staging
            .change_format_volume(&device, true, FsType::Ext4)
            .expect("format");
        staging.change_mount_point(&device, "/data").expect("mount");
        assert_eq!(staging.pending().len(), 3);

        staging.remove_partition(&device).expect("remove");
        assert!(!staging.has_pending());
        assert_eq!(staging.staged(), staging.committed());
    }

    #[test]
    fn format_and_label_coalesce() {
        let mut staging = Staging::new(model());
        staging.change_label("/dev/sda1", "boot").expect("label");
        assert_eq!(kinds(&staging), vec![ActionKind::SetLabel]);

        staging
            .change_format_volume("/dev/sda1", true, FsType::Vfat)
            .expect("format");
        staging
            .change_format_volume("/dev/sda1", true, FsType::Ext4)
            .expect("format again");
        assert_eq!(kinds(&staging), vec![ActionKind::Format]);
        assert!(matches!(
            &staging.pending()[0].action,
            Action::Format { fs: FsType::Ext4, label: Some(l), .. } if l == "boot"
        ));

        staging
            .change_format_volume("/dev/sda1", false, FsType::Ext4)
            .expect("unformat");
        assert!(!staging.has_pending());
    }

    #[test]
    fn mount_point_edit_back_to_current_drops_action() {
        let mut staging = Staging::new(model());
        staging.change_mount_point("/dev/sda1", "/srv").expect("mount");
        assert_eq!(kinds(&staging), vec![ActionKind::MountTable]);
        staging.change_mount_point("/dev/sda1", "/boot").expect("restore");
        assert!(!staging.has_pending());

        assert_eq!(
            staging.change_mount_point("/dev/sda1", "srv"),
            Err(VolumeError::MountPointInvalid.into())
        );
    }

    #[test]
    fn failed_request_leaves_no_trace() {
        let mut staging = Staging::new(model());
        staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("create");
        let before = (staging.staged().clone(), staging.pending().to_vec());

        assert_eq!(
            staging.change_label("/dev/sda2", "data"),
            Err(VolumeError::LabelNotSupported.into())
        );
        assert_eq!(
            staging.resize_volume("/dev/sda1", 400 * 1024),
            Err(DiskError::ResizeNoSpace.into())
        );
        assert_eq!((staging.staged().clone(), staging.pending().to_vec()), before);
    }

    #[test]
    fn resizing_a_new_partition_edits_its_creation() {
        let mut staging = Staging::new(model());
        let device = staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("create");
        staging.resize_volume(&device, 50 * 1024).expect("shrink");
        assert_eq!(kinds(&staging), vec![ActionKind::CreatePartition]);
        assert!(matches!(
            staging.pending()[0].action,
            Action::CreatePartition { region, .. } if region == Region::new(100, 50)
        ));
    }

    #[test]
    fn destroying_the_table_cancels_disk_actions() {
        let mut staging = Staging::new(model());
        staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 200)
            .expect("create");
        staging.change_label("/dev/sda1", "old").expect("label");
        staging
            .destroy_partition_table("/dev/sda", "gpt")
            .expect("destroy");
        assert_eq!(kinds(&staging), vec![ActionKind::DestroyPartitionTable]);
        assert_eq!(
            staging.destroy_partition_table("/dev/sda", "sun"),
            Err(DiskError::DestroyTableInvalidLabel.into())
        );
        let disk = staging.staged().disk("/dev/sda").expect("disk");
        assert!(disk.partitions.is_empty());
        assert_eq!(disk.label, PartitionTable::Gpt);
    }

    #[test]
    fn volume_group_and_logical_volume_rules() {
        let mut staging = Staging::new(model());
        let pv = staging
            .create_partition("/dev/sda", PartitionType::Primary, 100, 400)
            .expect("create");
        assert_eq!(
            staging.create_lvm_vg("bad name", 4096, false, &[&pv]),
            Err(ManagerError::VgInvalidName.into())
        );
        assert_eq!(
            staging.create_lvm_vg("data", 3000, false, &[&pv]),
            Err(LvmError::PeSizeInvalid.into())
        );
        assert_eq!(
            staging.create_lvm_vg("data", 4096, false, &["/dev/sda1"]),
            Err(LvmError::PvDeviceUsed.into())
        );
        assert_eq!(
            staging.create_lvm_vg("data", 4096, false, &[&pv, &pv]),
            Err(LvmError::PvAlreadyContained.into())
        );
        staging
            .create_lvm_vg("data", 4096, false, &[&pv])
            .expect("vg");
        assert_eq!(
            staging.remove_partition(&pv),
            Err(DiskError::RemovePartitionUsedBy.into())
        );

        let lv = staging
            .create_lvm_lv("data", "home", 200 * 1024, 1)
            .expect("lv");
        assert_eq!(lv, "/dev/data/home");
        assert_eq!(
            staging.create_lvm_lv("data", "home", 1024, 1),
            Err(LvmError::LvDuplicateName.into())
        );
        assert_eq!(
            staging.create_lvm_lv("data", "big", 300 * 1024, 1),
            Err(LvmError::LvNoSpace.into())
        );
        assert_eq!(
            staging.create_lvm_lv("data", "wide", 1024, 2),
            Err(LvmError::LvNoSpaceStriped.into())
        );

        staging.remove_lvm_vg("data").expect("remove vg");
        assert_eq!(kinds(&staging), vec![ActionKind::CreatePartition]);
    }

    #[test]
    fn removing_a_committed_volume_group_removes_its_volumes_first() {
        let mut model = model();
        model.volume_groups.push(VolumeGroup {
            name: "system".to_string(),
            pe_size_k: 4096,
            lvm1: false,
            physical_volumes: vec![PhysicalVolume {
                device: "/dev/sdb1".to_string(),
                pe_count: 100,
            }],
            logical_volumes: vec![LogicalVolume {
                name: "root".to_string(),
                vg_name: "system".to_string(),
                device: "/dev/system/root".to_string(),
                extents: 50,
                stripes: 1,
                volume: Volume::detected(200 * 1024, FsType::Ext4),
            }],
        });
        let mut staging = Staging::new(model);
        staging.remove_lvm_vg("system").expect("remove");
        assert_eq!(kinds(&staging), vec![ActionKind::RemoveLv, ActionKind::RemoveVg]);
        assert_eq!(
            staging.remove_lvm_lv_by_name("system", "root"),
            Err(ManagerError::LvmVgNotFound.into())
        );
    }

    #[test]
    fn encrypted_format_needs_a_password() {
        let mut staging = Staging::new(model());
        assert_eq!(
            staging.set_crypt("/dev/sda1", true),
            Err(VolumeError::CryptFormatRequired.into())
        );
        staging
            .change_format_volume("/dev/sda1", true, FsType::Ext4)
            .expect("format");
        staging.set_crypt("/dev/sda1", true).expect("crypt");
        assert_eq!(staging.finalize(5), Err(VolumeError::CryptNoPwd.into()));
        staging.set_crypt_password("/dev/sda1", "abc").expect("pwd");
        assert_eq!(staging.finalize(5), Err(VolumeError::CryptPwdTooShort.into()));
        staging
            .set_crypt_password("/dev/sda1", "correct horse")
            .expect("pwd");
        assert_eq!(staging.finalize(5), Ok(()));
    }
}
