//! The device model: every disk and volume group the engine manages.

use serde::{Deserialize, Serialize};

use crate::disk::Disk;
use crate::lvm::{LogicalVolume, VolumeGroup};
use crate::partition::Partition;
use crate::volume::Volume;

/// Where a volume lives in the model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VolumeRef {
    Partition { disk: String, number: u32 },
    LogicalVolume { vg: String, name: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    #[serde(default)]
    pub disks: Vec<Disk>,

    #[serde(default)]
    pub volume_groups: Vec<VolumeGroup>,
}

impl DeviceModel {
    pub fn disk(&self, device: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.device == device)
    }

    pub fn disk_mut(&mut self, device: &str) -> Option<&mut Disk> {
        self.disks.iter_mut().find(|d| d.device == device)
    }

    pub fn volume_group(&self, name: &str) -> Option<&VolumeGroup> {
        self.volume_groups.iter().find(|vg| vg.name == name)
    }

    pub fn volume_group_mut(&mut self, name: &str) -> Option<&mut VolumeGroup> {
        self.volume_groups.iter_mut().find(|vg| vg.name == name)
    }

    /// Disk holding the partition `device`
    pub fn disk_of_partition(&self, device: &str) -> Option<&Disk> {
        self.disks
            .iter()
            .find(|d| d.partition_by_device(device).is_some())
    }

    pub fn partition(&self, device: &str) -> Option<(&Disk, &Partition)> {
        self.disks
            .iter()
            .find_map(|d| d.partition_by_device(device).map(|p| (d, p)))
    }

    pub fn logical_volume(&self, device: &str) -> Option<(&VolumeGroup, &LogicalVolume)> {
        self.volume_groups
            .iter()
            .find_map(|vg| vg.lv_by_device(device).map(|lv| (vg, lv)))
    }

    pub fn locate(&self, device: &str) -> Option<VolumeRef> {
        if let Some((disk, partition)) = self.partition(device) {
            return Some(VolumeRef::Partition {
                disk: disk.device.clone(),
                number: partition.number,
            });
        }
        self.logical_volume(device)
            .map(|(vg, lv)| VolumeRef::LogicalVolume {
                vg: vg.name.clone(),
                name: lv.name.clone(),
            })
    }

    pub fn volume(&self, device: &str) -> Option<&Volume> {
        self.partition(device)
            .map(|(_, p)| &p.volume)
            .or_else(|| self.logical_volume(device).map(|(_, lv)| &lv.volume))
    }

    pub fn volume_mut(&mut self, device: &str) -> Option<&mut Volume> {
        if let Some(partition) = self
            .disks
            .iter_mut()
            .find_map(|d| d.partition_by_device_mut(device))
        {
            return Some(&mut partition.volume);
        }
        self.volume_groups
            .iter_mut()
            .flat_map(|vg| vg.logical_volumes.iter_mut())
            .find(|lv| lv.device == device)
            .map(|lv| &mut lv.volume)
    }

    /// Every volume with its device name, partitions first
    pub fn volumes(&self) -> impl Iterator<Item = (&str, &Volume)> {
        let partitions = self
            .disks
            .iter()
            .flat_map(|d| d.partitions.iter())
            .map(|p| (p.device.as_str(), &p.volume));
        let lvs = self
            .volume_groups
            .iter()
            .flat_map(|vg| vg.logical_volumes.iter())
            .map(|lv| (lv.device.as_str(), &lv.volume));
        partitions.chain(lvs)
    }

    /// Whether `device` exists as a partition or logical volume
    pub fn has_volume(&self, device: &str) -> bool {
        self.volume(device).is_some()
    }

    /// Whether any volume group lists `device` as a physical volume
    pub fn vg_using(&self, device: &str) -> Option<&VolumeGroup> {
        self.volume_groups.iter().find(|vg| vg.has_device(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Region;
    use crate::lvm::PhysicalVolume;
    use crate::partition::{PartitionTable, PartitionType};
    use crate::volume::FsType;

    fn model() -> DeviceModel {
        let mut disk = Disk::new("/dev/sda", 1024 * 1024, 1000, PartitionTable::Gpt);
        disk.insert_partition(Partition {
            device: "/dev/sda1".to_string(),
            number: 1,
            kind: PartitionType::Primary,
            region: Region::new(0, 100),
            id: 0x8e,
            volume: Volume::detected(100 * 1024, FsType::None),
        });
        let vg = VolumeGroup {
            name: "system".to_string(),
            pe_size_k: 4096,
            lvm1: false,
            physical_volumes: vec![PhysicalVolume {
                device: "/dev/sda1".to_string(),
                pe_count: 25,
            }],
            logical_volumes: vec![LogicalVolume {
                name: "root".to_string(),
                vg_name: "system".to_string(),
                device: "/dev/system/root".to_string(),
                extents: 10,
                stripes: 1,
                volume: Volume::detected(40960, FsType::Ext4),
            }],
        };
        DeviceModel {
            disks: vec![disk],
            volume_groups: vec![vg],
        }
    }

    #[test]
    fn locates_partitions_and_logical_volumes() {
        let model = model();
        assert_eq!(
            model.locate("/dev/sda1"),
            Some(VolumeRef::Partition {
                disk: "/dev/sda".to_string(),
                number: 1
            })
        );
        assert_eq!(
            model.locate("/dev/system/root"),
            Some(VolumeRef::LogicalVolume {
                vg: "system".to_string(),
                name: "root".to_string()
            })
        );
        assert_eq!(model.locate("/dev/sdb1"), None);
        assert_eq!(model.vg_using("/dev/sda1").map(|vg| vg.name.as_str()), Some("system"));
    }

    #[test]
    fn volume_mut_reaches_logical_volumes() {
        let mut model = model();
        model
            .volume_mut("/dev/system/root")
            .expect("lv present")
            .mount_point = Some("/".to_string());
        assert_eq!(
            model.volume("/dev/system/root").and_then(|v| v.mount_point.as_deref()),
            Some("/")
        );
        assert_eq!(model.volumes().count(), 2);
    }

    #[test]
    fn model_roundtrips_through_toml() {
        let model = model();
        let text = toml::to_string(&model).expect("serialize model");
        let parsed: DeviceModel = toml::from_str(&text).expect("parse model");
        assert_eq!(parsed, model);
    }
}
