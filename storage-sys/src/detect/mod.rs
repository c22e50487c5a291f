// SPDX-License-Identifier: GPL-3.0-only

//! Device detection
//!
//! Builds the initial [`DeviceModel`] from `lsblk`, the LVM reporting
//! tools, the mount table and `/proc/self/mountinfo`. Tools run through a
//! [`ToolRunner`] so detection can be replayed from recorded output.

mod lsblk;
mod lvm;
mod mounts;

use std::fs;

use storage_types::{DeviceModel, FstabOptions, FsType, MountBy, UsedBy};
use tracing::{debug, info};

use crate::error::Result;
use crate::fstab::{FstabLine, MountTable};
use crate::process::ToolRunner;

pub use lsblk::{CYLINDER_BYTES, LsblkDevice, disks_from_lsblk, parse_lsblk};
pub use lvm::{lvm_mapper_name, volume_groups_from_reports};
pub use mounts::{MountedFs, parse_mountinfo};

pub fn read_mountinfo() -> Result<String> {
    Ok(fs::read_to_string("/proc/self/mountinfo")?)
}

/// Detect every disk and volume group on the system
pub fn detect(
    runner: &mut dyn ToolRunner,
    table: &dyn MountTable,
    mountinfo: &str,
) -> Result<DeviceModel> {
    let devices = lsblk::run_lsblk(runner)?;
    let mut model = DeviceModel {
        disks: disks_from_lsblk(&devices),
        volume_groups: lvm::detect_volume_groups(runner, &devices)?,
    };

    for vg in &model.volume_groups {
        for pv in &vg.physical_volumes {
            debug!("{} is a physical volume of {}", pv.device, vg.name);
        }
    }
    let members: Vec<(String, String)> = model
        .volume_groups
        .iter()
        .flat_map(|vg| {
            vg.physical_volumes
                .iter()
                .map(|pv| (pv.device.clone(), vg.name.clone()))
        })
        .collect();
    for (device, vg) in members {
        if let Some(volume) = model.volume_mut(&device) {
            volume.used_by = UsedBy::Lvm(vg);
        }
    }

    apply_mounts(&mut model, &parse_mountinfo(mountinfo)?);
    apply_fstab(&mut model, &table.entries()?);

    info!(
        "Detected {} disk(s) and {} volume group(s)",
        model.disks.len(),
        model.volume_groups.len()
    );
    Ok(model)
}

/// Names a volume's block device may appear under in mount tables
fn aliases(model: &DeviceModel, device: &str) -> Vec<String> {
    let mut names = vec![
        device.to_string(),
        crate::commands::crypt_mapper_path(device),
    ];
    if let Some((vg, lv)) = model.logical_volume(device) {
        names.push(format!("/dev/mapper/{}", lvm_mapper_name(&vg.name, &lv.name)));
    }
    names
}

fn apply_mounts(model: &mut DeviceModel, mounted: &[MountedFs]) {
    let hits: Vec<String> = model
        .volumes()
        .filter(|(device, _)| {
            let names = aliases(model, device);
            mounted.iter().any(|m| names.contains(&m.source))
        })
        .map(|(device, _)| device.to_string())
        .collect();
    for device in hits {
        if let Some(volume) = model.volume_mut(&device) {
            volume.mounted = true;
        }
    }
}

fn resolve_spec(model: &DeviceModel, spec: &str) -> Option<(String, MountBy)> {
    if let Some(uuid) = spec.strip_prefix("UUID=") {
        return model
            .volumes()
            .find(|(_, v)| v.uuid.as_deref() == Some(uuid))
            .map(|(device, _)| (device.to_string(), MountBy::Uuid));
    }
    if let Some(label) = spec.strip_prefix("LABEL=") {
        return model
            .volumes()
            .find(|(_, v)| v.label.as_deref() == Some(label))
            .map(|(device, _)| (device.to_string(), MountBy::Label));
    }
    model
        .volumes()
        .find(|(device, _)| aliases(model, device).iter().any(|name| name == spec))
        .map(|(device, _)| (device.to_string(), MountBy::Device))
}

fn apply_fstab(model: &mut DeviceModel, lines: &[FstabLine]) {
    for line in lines {
        let Some((device, mount_by)) = resolve_spec(model, &line.spec) else {
            debug!("fstab entry {} matches no detected volume", line.spec);
            continue;
        };
        let encrypted_spec = line.spec.starts_with("/dev/mapper/cr_");
        let Some(volume) = model.volume_mut(&device) else {
            continue;
        };
        volume.mount_point = Some(line.mount_point.clone());
        volume.mount_by = mount_by;
        volume.fstab_options = if line.options == "defaults" {
            FstabOptions::default()
        } else {
            FstabOptions::parse(&line.options)
        };
        if !volume.fs.has_filesystem()
            && let Ok(fs) = line.fs_type.parse::<FsType>()
        {
            volume.fs = fs;
        }
        if encrypted_spec && !volume.encryption.is_encrypted() {
            volume.encryption = storage_types::EncryptType::Luks;
        }
        volume.persisted = volume.desired_entry(&device);
    }
}
