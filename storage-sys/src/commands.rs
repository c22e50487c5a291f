// SPDX-License-Identifier: GPL-3.0-only

//! Command templates, one function per tool operation.
//!
//! Cylinder arguments follow parted's `unit cyl` convention: the end
//! cylinder is inclusive.

use storage_types::{FsType, PartitionTable, PartitionType, Region, Secret, Volume, ids};

use crate::process::ToolCommand;

fn parted(disk: &str) -> ToolCommand {
    ToolCommand::new("parted").args(["-s", disk])
}

fn last_cylinder(region: &Region) -> u64 {
    region.end().saturating_sub(1).max(region.start)
}

pub fn mklabel(disk: &str, label: PartitionTable) -> ToolCommand {
    parted(disk).args(["mklabel", label.as_str()])
}

pub fn mkpart(disk: &str, kind: PartitionType, region: &Region) -> ToolCommand {
    let kind = match kind {
        PartitionType::Primary => "primary",
        PartitionType::Extended => "extended",
        PartitionType::Logical => "logical",
    };
    parted(disk).args([
        "unit".to_string(),
        "cyl".to_string(),
        "mkpart".to_string(),
        kind.to_string(),
        region.start.to_string(),
        last_cylinder(region).to_string(),
    ])
}

pub fn rmpart(disk: &str, number: u32) -> ToolCommand {
    parted(disk).args(["rm".to_string(), number.to_string()])
}

pub fn resizepart(disk: &str, number: u32, region: &Region) -> ToolCommand {
    parted(disk).args([
        "unit".to_string(),
        "cyl".to_string(),
        "resizepart".to_string(),
        number.to_string(),
        last_cylinder(region).to_string(),
    ])
}

/// GPT partition type GUID for an msdos style id byte
pub fn gpt_type_guid(id: u32) -> &'static str {
    match id {
        ids::SWAP => "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F",
        ids::LVM => "E6D6D379-F507-44C2-A23C-238F2A3DF928",
        ids::FAT32 | ids::NTFS => "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7",
        _ => "0FC63DAF-8483-4772-8E79-3D69D8477DE4",
    }
}

/// Inverse of [`gpt_type_guid`]
pub fn id_for_gpt_guid(guid: &str) -> u32 {
    match guid.to_ascii_uppercase().as_str() {
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => ids::SWAP,
        "E6D6D379-F507-44C2-A23C-238F2A3DF928" => ids::LVM,
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => ids::FAT32,
        _ => ids::LINUX,
    }
}

pub fn set_partition_id(disk: &str, label: PartitionTable, number: u32, id: u32) -> ToolCommand {
    let part_type = match label {
        PartitionTable::Msdos => format!("{id:x}"),
        PartitionTable::Gpt => gpt_type_guid(id).to_string(),
    };
    ToolCommand::new("sfdisk").args([
        "--part-type".to_string(),
        disk.to_string(),
        number.to_string(),
        part_type,
    ])
}

/// Unmount whatever is mounted from `device`
pub fn umount(device: &str) -> ToolCommand {
    ToolCommand::new("umount").arg(device)
}

/// Clear old filesystem and RAID signatures before formatting
pub fn wipe_signatures(device: &str) -> ToolCommand {
    ToolCommand::new("wipefs").args(["-a", device])
}

/// `None` for types that cannot be created
pub fn mkfs(fs: FsType, device: &str, label: Option<&str>) -> Option<ToolCommand> {
    let (program, force, label_flag): (&str, &[&str], &str) = match fs {
        FsType::Ext2 => ("mkfs.ext2", &["-F"], "-L"),
        FsType::Ext3 => ("mkfs.ext3", &["-F"], "-L"),
        FsType::Ext4 => ("mkfs.ext4", &["-F"], "-L"),
        FsType::Reiserfs => ("mkreiserfs", &["-f", "-f"], "-l"),
        FsType::Btrfs => ("mkfs.btrfs", &["-f"], "-L"),
        FsType::Vfat => ("mkfs.vfat", &[], "-n"),
        FsType::Xfs => ("mkfs.xfs", &["-f"], "-L"),
        FsType::Jfs => ("mkfs.jfs", &["-q"], "-L"),
        FsType::Ntfs => ("mkfs.ntfs", &["-f", "-F"], "-L"),
        FsType::Swap => ("mkswap", &[], "-L"),
        FsType::Unknown | FsType::None => return None,
    };
    let mut command = ToolCommand::new(program).args(force.iter().copied());
    if let Some(label) = label.filter(|l| !l.is_empty()) {
        command = command.args([label_flag, label]);
    }
    Some(command.arg(device))
}

/// Relabel an existing filesystem
pub fn set_label(fs: FsType, device: &str, label: &str) -> Option<ToolCommand> {
    let command = match fs {
        FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => {
            ToolCommand::new("tune2fs").args(["-L", label, device])
        }
        FsType::Reiserfs => ToolCommand::new("reiserfstune").args(["-l", label, device]),
        FsType::Btrfs => ToolCommand::new("btrfs").args(["filesystem", "label", device, label]),
        FsType::Vfat => ToolCommand::new("fatlabel").args([device, label]),
        FsType::Xfs => {
            let label = if label.is_empty() { "--" } else { label };
            ToolCommand::new("xfs_admin").args(["-L", label, device])
        }
        FsType::Jfs => ToolCommand::new("jfs_tune").args(["-L", label, device]),
        FsType::Ntfs => ToolCommand::new("ntfslabel").args([device, label]),
        FsType::Swap => ToolCommand::new("swaplabel").args(["-L", label, device]),
        FsType::Unknown | FsType::None => return None,
    };
    Some(command)
}

/// Resize the filesystem on `device` to `new_size_k`. Tools that only
/// work online get the volume's mount point.
pub fn resize_fs(device: &str, volume: &Volume, new_size_k: u64) -> Option<ToolCommand> {
    let mount_point = volume.mount_point.as_deref().filter(|mp| !mp.is_empty());
    let command = match volume.fs {
        FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => {
            ToolCommand::new("resize2fs").args([
                "-p".to_string(),
                device.to_string(),
                format!("{new_size_k}K"),
            ])
        }
        FsType::Reiserfs => ToolCommand::new("resize_reiserfs").args([
            "-f".to_string(),
            "-s".to_string(),
            format!("{new_size_k}K"),
            device.to_string(),
        ]),
        FsType::Ntfs => ToolCommand::new("ntfsresize").args([
            "-f".to_string(),
            "-s".to_string(),
            (new_size_k * 1024).to_string(),
            device.to_string(),
        ]),
        FsType::Vfat => ToolCommand::new("fatresize").args([
            "-s".to_string(),
            (new_size_k * 1024).to_string(),
            device.to_string(),
        ]),
        FsType::Xfs => ToolCommand::new("xfs_growfs").arg(mount_point?),
        FsType::Btrfs => ToolCommand::new("btrfs").args([
            "filesystem".to_string(),
            "resize".to_string(),
            format!("{new_size_k}k"),
            mount_point?.to_string(),
        ]),
        FsType::Jfs => ToolCommand::new("mount").args(["-o", "remount,resize", mount_point?]),
        FsType::Swap => {
            let mut command = ToolCommand::new("mkswap");
            if let Some(label) = volume.label.as_deref().filter(|l| !l.is_empty()) {
                command = command.args(["-L", label]);
            }
            if let Some(uuid) = volume.uuid.as_deref() {
                command = command.args(["-U", uuid]);
            }
            command.arg(device)
        }
        FsType::Unknown | FsType::None => return None,
    };
    Some(command)
}

/// Device-mapper name used while a volume's LUKS container is open
pub fn crypt_mapper_name(device: &str) -> String {
    let base = device.trim_start_matches("/dev/").replace('/', "_");
    format!("cr_{base}")
}

pub fn crypt_mapper_path(device: &str) -> String {
    format!("/dev/mapper/{}", crypt_mapper_name(device))
}

pub fn luks_format(device: &str, password: &Secret) -> ToolCommand {
    ToolCommand::new("cryptsetup")
        .args(["-q", "--key-file=-", "luksFormat", device])
        .stdin(password.clone())
}

pub fn luks_open(device: &str, password: &Secret) -> ToolCommand {
    ToolCommand::new("cryptsetup")
        .args(["--key-file=-", "luksOpen", device])
        .arg(crypt_mapper_name(device))
        .stdin(password.clone())
}

pub fn luks_close(device: &str) -> ToolCommand {
    ToolCommand::new("cryptsetup")
        .arg("luksClose")
        .arg(crypt_mapper_name(device))
}

pub fn pvcreate(device: &str) -> ToolCommand {
    ToolCommand::new("pvcreate").args(["-ff", "-y", device])
}

pub fn pvremove(device: &str) -> ToolCommand {
    ToolCommand::new("pvremove").args(["-y", device])
}

pub fn vgcreate(name: &str, pe_size_k: u64, lvm1: bool, devices: &[String]) -> ToolCommand {
    let mut command = ToolCommand::new("vgcreate");
    if lvm1 {
        command = command.args(["-M1"]);
    }
    command
        .args(["-s".to_string(), format!("{pe_size_k}k"), name.to_string()])
        .args(devices.iter().cloned())
}

pub fn vgextend(name: &str, devices: &[String]) -> ToolCommand {
    ToolCommand::new("vgextend").arg(name).args(devices.iter().cloned())
}

pub fn vgreduce(name: &str, devices: &[String]) -> ToolCommand {
    ToolCommand::new("vgreduce").arg(name).args(devices.iter().cloned())
}

pub fn vgremove(name: &str) -> ToolCommand {
    ToolCommand::new("vgremove").args(["-f", name])
}

pub fn lvcreate(vg: &str, name: &str, extents: u64, stripes: u32) -> ToolCommand {
    let mut command = ToolCommand::new("lvcreate").args(["-l".to_string(), extents.to_string()]);
    if stripes > 1 {
        command = command.args(["-i".to_string(), stripes.to_string()]);
    }
    command.args(["-n", name, vg])
}

pub fn lvremove(vg: &str, name: &str) -> ToolCommand {
    ToolCommand::new("lvremove").args(["-f".to_string(), format!("{vg}/{name}")])
}

pub fn lvresize(vg: &str, name: &str, extents: u64) -> ToolCommand {
    ToolCommand::new("lvresize").args([
        "-f".to_string(),
        "-l".to_string(),
        extents.to_string(),
        format!("{vg}/{name}"),
    ])
}
