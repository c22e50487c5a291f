// SPDX-License-Identifier: GPL-3.0-only

//! Pending actions
//!
//! An [`Action`] is one validated mutation. Applying it to a model yields
//! the state the planner promises after commit; settling it yields the
//! state the system is actually in once its tools succeeded.

use std::fmt;

use storage_contracts::{ActionRecord, ContainerError, StorageError, StorageResult};
use storage_types::{
    DeviceModel, EncryptType, FsType, FstabOptions, LogicalVolume, MountBy, Partition,
    PartitionTable, PartitionType, PhysicalVolume, Region, Secret, UsedBy, Volume, VolumeGroup,
    kb_to_pretty,
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    CreatePartition,
    RemovePartition,
    ResizePartition,
    ChangePartitionId,
    DestroyPartitionTable,
    Format,
    SetLabel,
    MountTable,
    CreateVg,
    RemoveVg,
    ExtendVg,
    ReduceVg,
    CreateLv,
    RemoveLv,
    ResizeLv,
}

/// Something an action reads or writes; actions sharing one are applied
/// in planning order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    Disk(String),
    Volume(String),
    VolumeGroup(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreatePartition {
        disk: String,
        device: String,
        number: u32,
        kind: PartitionType,
        region: Region,
        id: u32,
        size_k: u64,
    },
    RemovePartition {
        disk: String,
        device: String,
        number: u32,
        kind: PartitionType,
        region: Region,
    },
    ResizePartition {
        disk: String,
        device: String,
        number: u32,
        kind: PartitionType,
        from: Region,
        to: Region,
        size_k: u64,
    },
    ChangePartitionId {
        disk: String,
        device: String,
        number: u32,
        id: u32,
    },
    DestroyPartitionTable {
        disk: String,
        label: PartitionTable,
    },
    Format {
        device: String,
        fs: FsType,
        label: Option<String>,
        encryption: EncryptType,
        password: Option<Secret>,
    },
    SetLabel {
        device: String,
        fs: FsType,
        label: Option<String>,
    },
    MountTable {
        device: String,
        mount_point: Option<String>,
        mount_by: MountBy,
        options: FstabOptions,
    },
    CreateVg {
        name: String,
        pe_size_k: u64,
        lvm1: bool,
        devices: Vec<String>,
    },
    RemoveVg {
        name: String,
        devices: Vec<String>,
    },
    ExtendVg {
        name: String,
        devices: Vec<String>,
    },
    ReduceVg {
        name: String,
        devices: Vec<String>,
    },
    CreateLv {
        vg: String,
        name: String,
        device: String,
        extents: u64,
        stripes: u32,
        size_k: u64,
    },
    RemoveLv {
        vg: String,
        name: String,
        device: String,
    },
    ResizeLv {
        vg: String,
        name: String,
        device: String,
        from: u64,
        to: u64,
        size_k: u64,
    },
}

fn internal(what: impl fmt::Display) -> StorageError {
    warn!("Model out of sync with pending actions: {}", what);
    ContainerError::InternalError.into()
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreatePartition { .. } => ActionKind::CreatePartition,
            Action::RemovePartition { .. } => ActionKind::RemovePartition,
            Action::ResizePartition { .. } => ActionKind::ResizePartition,
            Action::ChangePartitionId { .. } => ActionKind::ChangePartitionId,
            Action::DestroyPartitionTable { .. } => ActionKind::DestroyPartitionTable,
            Action::Format { .. } => ActionKind::Format,
            Action::SetLabel { .. } => ActionKind::SetLabel,
            Action::MountTable { .. } => ActionKind::MountTable,
            Action::CreateVg { .. } => ActionKind::CreateVg,
            Action::RemoveVg { .. } => ActionKind::RemoveVg,
            Action::ExtendVg { .. } => ActionKind::ExtendVg,
            Action::ReduceVg { .. } => ActionKind::ReduceVg,
            Action::CreateLv { .. } => ActionKind::CreateLv,
            Action::RemoveLv { .. } => ActionKind::RemoveLv,
            Action::ResizeLv { .. } => ActionKind::ResizeLv,
        }
    }

    /// The volume this action is about, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            Action::CreatePartition { device, .. }
            | Action::RemovePartition { device, .. }
            | Action::ResizePartition { device, .. }
            | Action::ChangePartitionId { device, .. }
            | Action::Format { device, .. }
            | Action::SetLabel { device, .. }
            | Action::MountTable { device, .. }
            | Action::CreateLv { device, .. }
            | Action::RemoveLv { device, .. }
            | Action::ResizeLv { device, .. } => Some(device),
            _ => None,
        }
    }

    /// Disk whose partition table this action edits
    pub fn disk(&self) -> Option<&str> {
        match self {
            Action::CreatePartition { disk, .. }
            | Action::RemovePartition { disk, .. }
            | Action::ResizePartition { disk, .. }
            | Action::ChangePartitionId { disk, .. }
            | Action::DestroyPartitionTable { disk, .. } => Some(disk),
            _ => None,
        }
    }

    pub fn volume_group(&self) -> Option<&str> {
        match self {
            Action::CreateVg { name, .. }
            | Action::RemoveVg { name, .. }
            | Action::ExtendVg { name, .. }
            | Action::ReduceVg { name, .. } => Some(name),
            Action::CreateLv { vg, .. }
            | Action::RemoveLv { vg, .. }
            | Action::ResizeLv { vg, .. } => Some(vg),
            _ => None,
        }
    }

    pub fn entities(&self) -> Vec<Entity> {
        let mut entities = Vec::new();
        if let Action::DestroyPartitionTable { disk, .. } = self {
            entities.push(Entity::Disk(disk.clone()));
        }
        if let Some(device) = self.device() {
            entities.push(Entity::Volume(device.to_string()));
        }
        if let Some(vg) = self.volume_group() {
            entities.push(Entity::VolumeGroup(vg.to_string()));
        }
        if let Action::CreateVg { devices, .. }
        | Action::RemoveVg { devices, .. }
        | Action::ExtendVg { devices, .. }
        | Action::ReduceVg { devices, .. } = self
        {
            entities.extend(devices.iter().cloned().map(Entity::Volume));
        }
        entities
    }

    pub fn touches(&self, entity: &Entity) -> bool {
        self.entities().contains(entity)
    }

    /// Frees space, numbers or devices that later actions may reuse
    pub fn is_removal(&self) -> bool {
        match self {
            Action::RemovePartition { .. }
            | Action::DestroyPartitionTable { .. }
            | Action::RemoveVg { .. }
            | Action::ReduceVg { .. }
            | Action::RemoveLv { .. } => true,
            Action::ResizePartition { from, to, .. } => to.len < from.len,
            Action::ResizeLv { from, to, .. } => to < from,
            _ => false,
        }
    }

    /// Loses data already on disk
    pub fn is_destructive(&self) -> bool {
        match self {
            Action::RemovePartition { .. }
            | Action::DestroyPartitionTable { .. }
            | Action::Format { .. }
            | Action::RemoveVg { .. }
            | Action::RemoveLv { .. } => true,
            Action::ResizePartition { from, to, .. } => to.len < from.len,
            Action::ResizeLv { from, to, .. } => to < from,
            _ => false,
        }
    }

    /// Whether the action lives among logical partitions
    pub fn is_logical_level(&self) -> bool {
        match self {
            Action::CreatePartition { kind, .. }
            | Action::RemovePartition { kind, .. }
            | Action::ResizePartition { kind, .. } => *kind == PartitionType::Logical,
            _ => false,
        }
    }

    /// Cylinders this action gives back to its disk
    pub fn released(&self) -> Option<Region> {
        match self {
            Action::RemovePartition { region, .. } => Some(*region),
            Action::ResizePartition { from, to, .. } => from.released_by(to),
            _ => None,
        }
    }

    /// Cylinders this action takes from its disk
    pub fn claimed(&self) -> Option<Region> {
        match self {
            Action::CreatePartition { region, .. } => Some(*region),
            Action::ResizePartition { from, to, .. } => to.released_by(from),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Action::CreatePartition {
                device,
                kind,
                size_k,
                ..
            } => format!(
                "Create {kind} partition {device} ({})",
                kb_to_pretty(*size_k)
            ),
            Action::RemovePartition { device, .. } => format!("Delete partition {device}"),
            Action::ResizePartition {
                device,
                from,
                to,
                size_k,
                ..
            } => {
                let verb = if to.len < from.len { "Shrink" } else { "Grow" };
                format!("{verb} partition {device} to {}", kb_to_pretty(*size_k))
            }
            Action::ChangePartitionId { device, id, .. } => {
                format!("Set type of partition {device} to 0x{id:02x}")
            }
            Action::DestroyPartitionTable { disk, label } => {
                format!("Create new {label} partition table on {disk}")
            }
            Action::Format {
                device,
                fs,
                encryption,
                ..
            } => {
                if encryption.is_encrypted() {
                    format!("Format {device} with {fs} (encrypted)")
                } else {
                    format!("Format {device} with {fs}")
                }
            }
            Action::SetLabel { device, label, .. } => match label {
                Some(label) => format!("Set label of {device} to {label}"),
                None => format!("Clear label of {device}"),
            },
            Action::MountTable {
                device,
                mount_point,
                ..
            } => match mount_point.as_deref().filter(|mp| !mp.is_empty()) {
                Some(mount_point) => format!("Set mount point of {device} to {mount_point}"),
                None => format!("Remove {device} from the mount table"),
            },
            Action::CreateVg { name, devices, .. } => {
                format!("Create volume group {name} from {}", devices.join(", "))
            }
            Action::RemoveVg { name, .. } => format!("Remove volume group {name}"),
            Action::ExtendVg { name, devices } => {
                format!("Extend volume group {name} with {}", devices.join(", "))
            }
            Action::ReduceVg { name, devices } => {
                format!("Remove {} from volume group {name}", devices.join(", "))
            }
            Action::CreateLv { device, size_k, .. } => {
                format!("Create logical volume {device} ({})", kb_to_pretty(*size_k))
            }
            Action::RemoveLv { device, .. } => format!("Remove logical volume {device}"),
            Action::ResizeLv {
                device,
                from,
                to,
                size_k,
                ..
            } => {
                let verb = if to < from { "Shrink" } else { "Grow" };
                format!("{verb} logical volume {device} to {}", kb_to_pretty(*size_k))
            }
        }
    }

    /// Bring `model` to the state this action plans for.
    pub fn apply(&self, model: &mut DeviceModel) -> StorageResult<()> {
        match self {
            Action::CreatePartition {
                disk,
                device,
                number,
                kind,
                region,
                id,
                size_k,
            } => {
                let disk = model.disk_mut(disk).ok_or_else(|| internal(disk))?;
                disk.insert_partition(Partition {
                    device: device.clone(),
                    number: *number,
                    kind: *kind,
                    region: *region,
                    id: *id,
                    volume: Volume::detected(*size_k, FsType::None),
                });
            }
            Action::RemovePartition { disk, number, .. } => {
                model
                    .disk_mut(disk)
                    .and_then(|d| d.remove_partition(*number))
                    .ok_or_else(|| internal(format!("{disk} partition {number}")))?;
            }
            Action::ResizePartition {
                device, to, size_k, ..
            } => {
                let partition = model
                    .disks
                    .iter_mut()
                    .find_map(|d| d.partition_by_device_mut(device))
                    .ok_or_else(|| internal(device))?;
                partition.region = *to;
                partition.volume.size_k = *size_k;
            }
            Action::ChangePartitionId { device, id, .. } => {
                let partition = model
                    .disks
                    .iter_mut()
                    .find_map(|d| d.partition_by_device_mut(device))
                    .ok_or_else(|| internal(device))?;
                partition.id = *id;
            }
            Action::DestroyPartitionTable { disk, label } => {
                let disk = model.disk_mut(disk).ok_or_else(|| internal(disk))?;
                disk.partitions.clear();
                disk.label = *label;
            }
            Action::Format {
                device,
                fs,
                label,
                encryption,
                password,
            } => {
                let volume = model.volume_mut(device).ok_or_else(|| internal(device))?;
                volume.format = true;
                volume.fs = *fs;
                volume.label = label.clone();
                volume.uuid = None;
                volume.encryption = *encryption;
                volume.password = password.clone();
            }
            Action::SetLabel { device, label, .. } => {
                let volume = model.volume_mut(device).ok_or_else(|| internal(device))?;
                volume.label = label.clone();
            }
            Action::MountTable {
                device,
                mount_point,
                mount_by,
                options,
            } => {
                let volume = model.volume_mut(device).ok_or_else(|| internal(device))?;
                volume.mount_point = mount_point.clone();
                volume.mount_by = *mount_by;
                volume.fstab_options = options.clone();
            }
            Action::CreateVg {
                name,
                pe_size_k,
                lvm1,
                devices,
            } => {
                let mut vg = VolumeGroup {
                    name: name.clone(),
                    pe_size_k: *pe_size_k,
                    lvm1: *lvm1,
                    physical_volumes: Vec::new(),
                    logical_volumes: Vec::new(),
                };
                add_physical_volumes(model, &mut vg, devices)?;
                model.volume_groups.push(vg);
            }
            Action::RemoveVg { name, devices } => {
                let position = model
                    .volume_groups
                    .iter()
                    .position(|vg| vg.name == *name)
                    .ok_or_else(|| internal(name))?;
                model.volume_groups.remove(position);
                release_devices(model, devices);
            }
            Action::ExtendVg { name, devices } => {
                let mut vg = model
                    .volume_group(name)
                    .cloned()
                    .ok_or_else(|| internal(name))?;
                add_physical_volumes(model, &mut vg, devices)?;
                if let Some(slot) = model.volume_group_mut(name) {
                    *slot = vg;
                }
            }
            Action::ReduceVg { name, devices } => {
                let vg = model.volume_group_mut(name).ok_or_else(|| internal(name))?;
                vg.physical_volumes.retain(|pv| !devices.contains(&pv.device));
                release_devices(model, devices);
            }
            Action::CreateLv {
                vg,
                name,
                device,
                extents,
                stripes,
                size_k,
            } => {
                let group = model.volume_group_mut(vg).ok_or_else(|| internal(vg))?;
                group.logical_volumes.push(LogicalVolume {
                    name: name.clone(),
                    vg_name: vg.clone(),
                    device: device.clone(),
                    extents: *extents,
                    stripes: *stripes,
                    volume: Volume::detected(*size_k, FsType::None),
                });
            }
            Action::RemoveLv { vg, name, .. } => {
                let group = model.volume_group_mut(vg).ok_or_else(|| internal(vg))?;
                let before = group.logical_volumes.len();
                group.logical_volumes.retain(|lv| lv.name != *name);
                if group.logical_volumes.len() == before {
                    return Err(internal(format!("{vg}/{name}")));
                }
            }
            Action::ResizeLv {
                vg,
                name,
                to,
                size_k,
                ..
            } => {
                let lv = model
                    .volume_group_mut(vg)
                    .and_then(|g| g.logical_volumes.iter_mut().find(|lv| lv.name == *name))
                    .ok_or_else(|| internal(format!("{vg}/{name}")))?;
                lv.extents = *to;
                lv.volume.size_k = *size_k;
            }
        }
        Ok(())
    }

    /// Bring `model` to the state the system is in after this action's
    /// tools succeeded.
    pub fn settle(&self, model: &mut DeviceModel) -> StorageResult<()> {
        self.apply(model)?;
        match self {
            Action::Format { device, fs, .. } => {
                let volume = model.volume_mut(device).ok_or_else(|| internal(device))?;
                volume.format = false;
                volume.detected_fs = *fs;
                volume.mounted = false;
                volume.password = None;
            }
            Action::MountTable { device, .. } => {
                let volume = model.volume_mut(device).ok_or_else(|| internal(device))?;
                volume.persisted = volume.desired_entry(device);
            }
            _ => {}
        }
        Ok(())
    }
}

fn add_physical_volumes(
    model: &mut DeviceModel,
    vg: &mut VolumeGroup,
    devices: &[String],
) -> StorageResult<()> {
    for device in devices {
        let volume = model.volume_mut(device).ok_or_else(|| internal(device))?;
        volume.used_by = UsedBy::Lvm(vg.name.clone());
        let pe_count = vg.pe_for_device(volume.size_k);
        vg.physical_volumes.push(PhysicalVolume {
            device: device.clone(),
            pe_count,
        });
    }
    Ok(())
}

fn release_devices(model: &mut DeviceModel, devices: &[String]) {
    for device in devices {
        if let Some(volume) = model.volume_mut(device) {
            volume.used_by = UsedBy::None;
        }
    }
}

/// A validated action waiting for commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    /// Position in planning order
    pub seq: u64,
    pub action: Action,
}

impl PendingAction {
    pub fn record(&self) -> ActionRecord {
        ActionRecord::new(
            self.seq,
            self.action.describe(),
            self.action.is_destructive(),
        )
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.action.describe())
    }
}
