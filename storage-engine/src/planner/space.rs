// SPDX-License-Identifier: GPL-3.0-only

//! Space maker
//!
//! Finds room for new partitions on a set of candidate disks. Unused
//! cylinders are taken first. When they are not enough, one NTFS or VFAT
//! partition is shrunk, and after that the partitions the caller marked
//! as deletable are removed one by one. Shrinks and removals are queued
//! like any other request and are undone together if no room is found.

use storage_contracts::{DiskError, ManagerError, StorageResult};
use storage_types::{FreeSlot, FsType, PartitionType, SpaceRequest};
use tracing::{debug, info};

use super::{Staging, Target};

impl Staging {
    /// Unused regions of `disks`, primary slots before logical ones
    pub fn find_space(&self, disks: &[&str]) -> StorageResult<Vec<FreeSlot>> {
        let mut slots = Vec::new();
        for &name in disks {
            let disk = self.staged.disk(name).ok_or(ManagerError::DiskNotFound)?;
            if disk.read_only {
                debug!("Skipping read-only disk {}", name);
                continue;
            }
            let slot = |kind, region| FreeSlot {
                disk: disk.device.clone(),
                kind,
                region,
                size_k: disk.cylinder_to_kb(region.len),
            };
            if disk.free_primary_number().is_some() {
                slots.extend(
                    disk.free_regions()
                        .into_iter()
                        .map(|r| slot(PartitionType::Primary, r)),
                );
            }
            slots.extend(
                disk.free_logical_regions()
                    .into_iter()
                    .map(|r| slot(PartitionType::Logical, r)),
            );
        }
        Ok(slots)
    }

    pub fn make_space(&mut self, request: &SpaceRequest) -> StorageResult<FreeSlot> {
        if request.size_k == 0 {
            return Err(DiskError::CreatePartitionZeroSize.into());
        }
        if request.disks.is_empty() {
            return Err(ManagerError::DiskNotFound.into());
        }
        self.transact(|s| {
            if let Some(slot) = s.fitting(request)? {
                debug!("Unused space at {} on {} is enough", slot.region, slot.disk);
                return Ok(slot);
            }
            if request.shrink_windows
                && let Some(slot) = s.shrink_windows(request)?
            {
                return Ok(slot);
            }
            for device in &request.deletable {
                let on_candidate = s
                    .staged
                    .disk_of_partition(device)
                    .is_some_and(|d| request.disks.contains(&d.device));
                if !on_candidate {
                    debug!("{} is not on a candidate disk, keeping it", device);
                    continue;
                }
                info!("Deleting {} to make room", device);
                s.drop_partition(device)?;
                if let Some(slot) = s.fitting(request)? {
                    return Ok(slot);
                }
            }
            Err(DiskError::CreatePartitionNoSpace.into())
        })
    }

    fn fitting(&self, request: &SpaceRequest) -> StorageResult<Option<FreeSlot>> {
        let disks: Vec<&str> = request.disks.iter().map(String::as_str).collect();
        let slot = self.find_space(&disks)?.into_iter().find(|slot| {
            self.staged
                .disk(&slot.disk)
                .is_some_and(|d| slot.region.len >= d.kb_to_cylinder(request.size_k))
        });
        Ok(slot)
    }

    /// Shrink the first Windows partition whose freed tail, joined with
    /// the unused space behind it, holds the request.
    fn shrink_windows(&mut self, request: &SpaceRequest) -> StorageResult<Option<FreeSlot>> {
        let mut candidates = Vec::new();
        for name in &request.disks {
            let Some(disk) = self.staged.disk(name) else {
                continue;
            };
            if disk.read_only || disk.free_primary_number().is_none() {
                continue;
            }
            let need = disk.kb_to_cylinder(request.size_k);
            let free = disk.free_regions();
            for partition in disk.partitions.iter().filter(|p| p.kind == PartitionType::Primary) {
                let volume = &partition.volume;
                let windows = matches!(volume.effective_fs(), FsType::Ntfs | FsType::Vfat);
                if !windows || volume.format || volume.used_by.is_used() {
                    continue;
                }
                let behind = free
                    .iter()
                    .find(|r| r.start == partition.region.end())
                    .map_or(0, |r| r.len);
                let Some(keep) = partition.region.len.checked_sub(need.saturating_sub(behind))
                else {
                    continue;
                };
                if keep > 0 {
                    candidates.push((partition.device.clone(), disk.cylinder_to_kb(keep)));
                }
            }
        }

        for (device, size_k) in candidates {
            let (Target::Partition { .. }, volume) = self.editable(&device)? else {
                continue;
            };
            match self.resize_partition(&device, &volume, size_k) {
                Ok(()) => {
                    info!("Shrinking {} to make room", device);
                    return self.fitting(request);
                }
                Err(e) => debug!("{} cannot be shrunk: {}", device, e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use storage_contracts::StorageError;
    use storage_types::{DeviceModel, Disk, Partition, PartitionTable, Region, Volume, ids};

    use super::*;
    use crate::action::Action;

    fn primary(number: u32, region: Region, id: u32, fs: FsType) -> Partition {
        Partition {
            device: format!("/dev/sda{number}"),
            number,
            kind: PartitionType::Primary,
            region,
            id,
            volume: Volume::detected(region.len * 1024, fs),
        }
    }

    /// 1000 MiB disk: ntfs sda1 on [0, 600), ext4 sda2 on [600, 800)
    fn dual_boot() -> Staging {
        let mut disk = Disk::new("/dev/sda", 1024 * 1024, 1000, PartitionTable::Msdos);
        disk.insert_partition(primary(1, Region::new(0, 600), ids::NTFS, FsType::Ntfs));
        disk.insert_partition(primary(2, Region::new(600, 200), ids::LINUX, FsType::Ext4));
        Staging::new(DeviceModel {
            disks: vec![disk],
            volume_groups: Vec::new(),
        })
    }

    fn request(size_mb: u64) -> SpaceRequest {
        SpaceRequest {
            disks: vec!["/dev/sda".to_string()],
            size_k: size_mb * 1024,
            ..SpaceRequest::default()
        }
    }

    #[test]
    fn unused_space_comes_first() {
        let mut staging = dual_boot();
        let slot = staging.make_space(&request(150)).expect("room at the end");
        assert_eq!(slot.region, Region::new(800, 200));
        assert_eq!(slot.kind, PartitionType::Primary);
        assert!(!staging.has_pending());
    }

    #[test]
    fn windows_partition_is_shrunk_before_anything_is_deleted() {
        let mut staging = dual_boot();
        let wanted = SpaceRequest {
            shrink_windows: true,
            deletable: vec!["/dev/sda2".to_string()],
            ..request(300)
        };
        let slot = staging.make_space(&wanted).expect("shrink sda1");
        assert_eq!(slot.region, Region::new(300, 300));
        assert_eq!(staging.pending().len(), 1);
        assert!(matches!(
            &staging.pending()[0].action,
            Action::ResizePartition { device, to, .. }
                if device == "/dev/sda1" && *to == Region::new(0, 300)
        ));
    }

    #[test]
    fn deletable_partitions_go_one_at_a_time() {
        let mut staging = dual_boot();
        let wanted = SpaceRequest {
            deletable: vec!["/dev/sda2".to_string(), "/dev/sda1".to_string()],
            ..request(400)
        };
        let slot = staging.make_space(&wanted).expect("room after sda2");
        assert_eq!(slot.region, Region::new(600, 400));
        assert_eq!(staging.pending().len(), 1);
        assert!(staging.staged().partition("/dev/sda1").is_some());
    }

    #[test]
    fn failure_keeps_every_partition() {
        let mut staging = dual_boot();
        let wanted = SpaceRequest {
            shrink_windows: true,
            deletable: vec!["/dev/sda2".to_string()],
            ..request(5000)
        };
        assert_eq!(
            staging.make_space(&wanted),
            Err(StorageError::from(DiskError::CreatePartitionNoSpace))
        );
        assert!(!staging.has_pending());
        assert_eq!(staging.staged(), staging.committed());
    }

    #[test]
    fn slots_follow_the_partition_level() {
        let mut staging = dual_boot();
        staging
            .create_partition("/dev/sda", PartitionType::Extended, 800, 200)
            .expect("extended");
        let slots = staging.find_space(&["/dev/sda"]).expect("sda");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].kind, PartitionType::Logical);
        assert_eq!(slots[0].region, Region::new(800, 200));
        assert_eq!(
            staging.find_space(&["/dev/sdz"]),
            Err(StorageError::from(ManagerError::DiskNotFound))
        );
    }
}
