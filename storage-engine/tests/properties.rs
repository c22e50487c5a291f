mod common;

use common::{blank, lab, lab_with};
use proptest::prelude::*;
use storage_contracts::{DiskError, StorageError, StorageInterface};
use storage_engine::{EngineConfig, Request};
use storage_testing::ScriptedRunner;
use storage_types::{Disk, FsType, PartitionType};

fn kind() -> impl Strategy<Value = PartitionType> {
    prop_oneof![
        3 => Just(PartitionType::Primary),
        1 => Just(PartitionType::Extended),
        3 => Just(PartitionType::Logical),
    ]
}

fn requests() -> impl Strategy<Value = Vec<(PartitionType, u64, u64)>> {
    proptest::collection::vec((kind(), 0u64..2100, 0u64..700), 1..16)
}

/// Requests against the two-disk lab, valid or not
fn request() -> impl Strategy<Value = Request> {
    let device = || Just("/dev/sda1".to_string());
    prop_oneof![
        (device(), prop::sample::select(vec!["/data", "/srv", "/boot", "/", ""])).prop_map(
            |(device, mount_point)| Request::MountPoint {
                device,
                mount_point: mount_point.to_string(),
            }
        ),
        (device(), prop::sample::select(vec!["", "boot", "data", "a-label-far-too-long"]))
            .prop_map(|(device, label)| Request::Label {
                device,
                label: label.to_string(),
            }),
        (device(), prop::sample::select(vec!["noatime", "nodev,noatime", "ro", "noatime,noatime"]))
            .prop_map(|(device, options)| Request::AddFstabOptions {
                device,
                options: options.to_string(),
            }),
        (
            device(),
            prop::sample::select(vec![FsType::Ext4, FsType::Vfat, FsType::Xfs, FsType::Swap]),
            any::<bool>()
        )
            .prop_map(|(device, fs, format)| Request::Format { device, fs, format }),
        (0u64..1900, 1u64..100).prop_map(|(start_cyl, size_cyl)| Request::CreatePartition {
            disk: "/dev/sdb".to_string(),
            kind: PartitionType::Primary,
            start_cyl,
            size_cyl,
        }),
    ]
}

fn check_layout(disk: &Disk) -> Result<(), TestCaseError> {
    let extended: Vec<_> = disk.partitions.iter().filter(|p| p.is_extended()).collect();
    prop_assert!(extended.len() <= 1);

    for (i, a) in disk.partitions.iter().enumerate() {
        prop_assert!(!a.region.is_empty());
        prop_assert!(a.region.fits_within(disk.cylinders));
        if a.is_logical() {
            prop_assert!(extended.iter().any(|ext| ext.region.contains(&a.region)));
        }
        for b in &disk.partitions[i + 1..] {
            if a.is_logical() == b.is_logical() {
                prop_assert!(
                    !a.region.overlaps(&b.region),
                    "{} overlaps {}",
                    a.device,
                    b.device
                );
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn accepted_requests_keep_the_layout_valid(requests in requests()) {
        let mut lab = lab_with(blank(2000), ScriptedRunner::new(), &EngineConfig::default());
        for (kind, start, len) in requests {
            let before = lab.manager.get_partitions_on("/dev/sdc").expect("sdc");
            let Ok(device) = lab.manager.create_partition("/dev/sdc", kind, start, len) else {
                continue;
            };
            let after = lab.manager.get_partitions_on("/dev/sdc").expect("sdc");
            let created = after.iter().find(|p| p.name == device).expect("listed");
            prop_assert_eq!((created.cyl_start, created.cyl_size), (start, len));
            prop_assert_eq!(created.partition_type, kind);
            for old in &before {
                prop_assert!(after.contains(old), "{} changed", old.name);
            }
        }
        let staged = lab
            .manager
            .staging()
            .staged()
            .disk("/dev/sdc")
            .cloned()
            .expect("disk stays");
        check_layout(&staged)?;

        if !lab.manager.get_commit_actions(false).is_empty() {
            lab.manager
                .commit()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        prop_assert_eq!(lab.manager.staging().committed().disk("/dev/sdc"), Some(&staged));
    }

    #[test]
    fn undoing_every_creation_leaves_nothing_to_do(requests in requests()) {
        let mut lab = lab_with(blank(2000), ScriptedRunner::new(), &EngineConfig::default());
        let mut created = Vec::new();
        for (kind, start, len) in requests {
            if let Ok(device) = lab.manager.create_partition("/dev/sdc", kind, start, len) {
                created.push(device);
            }
        }
        for device in created.iter().rev() {
            let removed = lab.manager.remove_partition(device);
            prop_assert!(removed.is_ok(), "{}: {:?}", device, removed);
        }
        prop_assert!(lab.manager.get_commit_actions(false).is_empty());
        prop_assert_eq!(lab.manager.staging().staged(), lab.manager.staging().committed());
    }

    #[test]
    fn intersecting_ranges_are_refused(
        start in 0u64..1500,
        len in 1u64..400,
        inside in any::<prop::sample::Index>(),
        before in any::<u64>(),
        after in any::<u64>(),
    ) {
        let mut lab = lab_with(blank(2000), ScriptedRunner::new(), &EngineConfig::default());
        lab.manager
            .create_partition("/dev/sdc", PartitionType::Primary, start, len)
            .expect("blank disk");
        let staged = lab.manager.staging().staged().clone();

        // Any range holding a cylinder of the partition intersects it.
        let shared = start + inside.index(len as usize) as u64;
        let new_start = shared - before % (shared + 1);
        let new_end = shared + 1 + after % (2000 - shared);
        let result = lab.manager.create_partition(
            "/dev/sdc",
            PartitionType::Primary,
            new_start,
            new_end - new_start,
        );
        prop_assert_eq!(
            result,
            Err(StorageError::from(DiskError::CreatePartitionOverlapsExisting))
        );
        prop_assert_eq!(lab.manager.staging().staged(), &staged);
    }

    #[test]
    fn repeating_a_request_changes_nothing_more(request in request()) {
        let mut lab = lab(ScriptedRunner::new());
        let first = request.apply(&mut lab.manager);
        let staged = lab.manager.staging().staged().clone();
        let pending = lab.manager.staging().pending().to_vec();

        let second = request.apply(&mut lab.manager);
        match (&request, &first) {
            (Request::CreatePartition { .. }, Ok(_)) => prop_assert_eq!(
                second,
                Err(StorageError::from(DiskError::CreatePartitionOverlapsExisting))
            ),
            (_, Ok(_)) => prop_assert_eq!(second, Ok(None)),
            (_, Err(e)) => prop_assert_eq!(second, Err(e.clone())),
        }
        prop_assert_eq!(lab.manager.staging().staged(), &staged);
        prop_assert_eq!(lab.manager.staging().pending(), pending.as_slice());
        prop_assert!(pending.len() <= 2);
    }
}
