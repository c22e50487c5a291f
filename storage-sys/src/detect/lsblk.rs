// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use storage_types::{
    Disk, EncryptType, FIRST_LOGICAL, FsType, Partition, PartitionTable, PartitionType, Region,
    Volume, ids,
};

use crate::commands::id_for_gpt_guid;
use crate::error::{Result, SysError};
use crate::process::{ToolCommand, ToolRunner};

/// Bytes per cylinder in the traditional 255 heads x 63 sectors geometry
pub const CYLINDER_BYTES: u64 = 255 * 63 * 512;

const SECTOR_BYTES: u64 = 512;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LsblkDevice {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "number")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "number")]
    pub start: Option<u64>,
    #[serde(default, deserialize_with = "flag")]
    pub ro: bool,
    #[serde(default)]
    pub pttype: Option<String>,
    #[serde(default)]
    pub parttype: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub children: Vec<LsblkDevice>,
}

#[derive(Deserialize)]
struct LsblkReport {
    blockdevices: Vec<LsblkDevice>,
}

// Older util-linux prints every column as a string
fn number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_u64() == Some(1),
        Value::String(s) => s.trim() == "1",
        _ => false,
    })
}

pub fn parse_lsblk(json: &str) -> Result<Vec<LsblkDevice>> {
    serde_json::from_str::<LsblkReport>(json)
        .map(|report| report.blockdevices)
        .map_err(|e| SysError::parse("lsblk output", e))
}

pub(super) fn run_lsblk(runner: &mut dyn ToolRunner) -> Result<Vec<LsblkDevice>> {
    let command = ToolCommand::new("lsblk").args([
        "-J",
        "-b",
        "-o",
        "NAME,PATH,TYPE,SIZE,START,RO,PTTYPE,PARTTYPE,FSTYPE,LABEL,UUID",
    ]);
    let output = runner.capture(&command)?;
    if !output.success() {
        return Err(SysError::OperationFailed(format!(
            "lsblk failed: {}",
            output.stderr_text()
        )));
    }
    parse_lsblk(&output.stdout_text())
}

/// Every device in the tree, parents before children
pub fn flatten(devices: &[LsblkDevice]) -> Vec<&LsblkDevice> {
    let mut out = Vec::new();
    for device in devices {
        out.push(device);
        out.extend(flatten(&device.children));
    }
    out
}

fn partition_number(device: &LsblkDevice) -> Option<u32> {
    let digits: String = device
        .name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

fn partition_id(label: PartitionTable, parttype: Option<&str>) -> u32 {
    match (label, parttype) {
        (PartitionTable::Msdos, Some(hex)) => {
            u32::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap_or(ids::LINUX)
        }
        (PartitionTable::Gpt, Some(guid)) => id_for_gpt_guid(guid),
        (_, None) => ids::LINUX,
    }
}

/// Filesystem and encryption as seen by blkid; LUKS containers report the
/// filesystem of their opened mapping, if any.
pub fn volume_for(device: &LsblkDevice) -> Volume {
    let size_k = device.size.unwrap_or(0) / 1024;
    let (fs, encryption, inner) = match device.fstype.as_deref() {
        Some("crypto_LUKS") => {
            let inner = device.children.iter().find(|c| c.kind == "crypt");
            let fs = inner
                .and_then(|c| c.fstype.as_deref())
                .and_then(|t| t.parse().ok())
                .unwrap_or(FsType::Unknown);
            (fs, EncryptType::Luks, inner)
        }
        Some("LVM2_member") | None => (FsType::None, EncryptType::None, None),
        Some(other) => (
            other.parse().unwrap_or(FsType::Unknown),
            EncryptType::None,
            None,
        ),
    };
    let source = inner.unwrap_or(device);
    let mut volume = Volume::detected(size_k, fs);
    volume.encryption = encryption;
    volume.label = source.label.clone();
    volume.uuid = source.uuid.clone();
    volume
}

pub fn disks_from_lsblk(devices: &[LsblkDevice]) -> Vec<Disk> {
    devices
        .iter()
        .filter(|d| d.kind == "disk")
        .map(|device| {
            let label = match device.pttype.as_deref() {
                Some("gpt") => PartitionTable::Gpt,
                _ => PartitionTable::Msdos,
            };
            let mut disk = Disk::new(
                device.path.clone(),
                CYLINDER_BYTES,
                device.size.unwrap_or(0) / CYLINDER_BYTES,
                label,
            );
            disk.read_only = device.ro;

            for child in device.children.iter().filter(|c| c.kind == "part") {
                let Some(number) = partition_number(child) else {
                    continue;
                };
                let start = child.start.unwrap_or(0) * SECTOR_BYTES / CYLINDER_BYTES;
                let len = (child.size.unwrap_or(0) / CYLINDER_BYTES).max(1);
                let id = partition_id(label, child.parttype.as_deref());
                let kind = if label == PartitionTable::Msdos && ids::is_extended(id) {
                    PartitionType::Extended
                } else if label == PartitionTable::Msdos && number >= FIRST_LOGICAL {
                    PartitionType::Logical
                } else {
                    PartitionType::Primary
                };
                disk.insert_partition(Partition {
                    device: child.path.clone(),
                    number,
                    kind,
                    region: Region::new(start, len),
                    id,
                    volume: volume_for(child),
                });
            }

            // The kernel reports an extended partition as 1 KiB; span it
            // over its logicals instead.
            let logical_end = disk.logicals().map(|p| p.region.end()).max();
            if let (Some(end), Some(extended)) = (
                logical_end,
                disk.partitions.iter_mut().find(|p| p.is_extended()),
            ) && end > extended.region.end()
            {
                extended.region.len = end - extended.region.start;
                extended.volume.size_k = extended.region.len * CYLINDER_BYTES / 1024;
            }
            disk
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_string_columns_from_old_lsblk() {
        let devices = parse_lsblk(
            r#"{"blockdevices": [{"name": "vda", "path": "/dev/vda", "type": "disk",
                "size": "8225280000", "ro": "1", "pttype": null}]}"#,
        )
        .expect("parse");
        assert_eq!(devices[0].size, Some(8_225_280_000));
        assert!(devices[0].ro);
        let disks = disks_from_lsblk(&devices);
        assert_eq!(disks[0].cylinders, 1000);
        assert!(disks[0].read_only);
    }

    #[test]
    fn extended_partition_spans_its_logicals() {
        let devices = parse_lsblk(
            r#"{"blockdevices": [{"name": "sdb", "path": "/dev/sdb", "type": "disk",
                "size": 82252800000, "ro": false, "pttype": "dos", "children": [
                  {"name": "sdb2", "path": "/dev/sdb2", "type": "part", "size": 1024,
                   "start": 160650, "parttype": "0x5"},
                  {"name": "sdb5", "path": "/dev/sdb5", "type": "part", "size": 822528000,
                   "start": 176715, "parttype": "0x83", "fstype": "crypto_LUKS", "uuid": "outer",
                   "children": [{"name": "cr_sdb5", "path": "/dev/mapper/cr_sdb5", "type": "crypt",
                                 "size": 820000000, "fstype": "ext4", "uuid": "inner"}]}
                ]}]}"#,
        )
        .expect("parse");
        let disks = disks_from_lsblk(&devices);
        let disk = &disks[0];
        let extended = disk.extended().expect("extended");
        assert_eq!(extended.region.start, 10);
        let logical = disk.partition(5).expect("logical");
        assert_eq!(logical.kind, PartitionType::Logical);
        assert!(extended.region.contains(&logical.region));
        assert_eq!(logical.volume.encryption, EncryptType::Luks);
        assert_eq!(logical.volume.fs, FsType::Ext4);
        assert_eq!(logical.volume.uuid.as_deref(), Some("inner"));
    }
}
