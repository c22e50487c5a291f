mod common;

use common::{lab, mount_points};
use storage_contracts::{LvmError, ManagerError, StorageInterface};
use storage_testing::ScriptedRunner;
use storage_types::{PartitionType, ids};

fn pv_on_sdb(lab: &mut common::Lab, start: u64, cylinders: u64) -> String {
    let device = lab
        .manager
        .create_partition("/dev/sdb", PartitionType::Primary, start, cylinders)
        .expect("free space on sdb");
    lab.manager
        .change_partition_id(&device, ids::LVM)
        .expect("lvm id");
    device
}

#[test]
fn extending_a_group_makes_room_for_new_volumes() {
    let mut lab = lab(ScriptedRunner::new());
    pv_on_sdb(&mut lab, 0, 500);
    lab.manager
        .extend_lvm_vg("system", &["/dev/sdb1"])
        .expect("extend");

    let m = &mut lab.manager;
    assert_eq!(
        m.create_lvm_lv("system", "home", 800, 1),
        Err(LvmError::LvNoSpace.into())
    );
    assert_eq!(
        m.create_lvm_lv("system", "home", 600, 3),
        Err(LvmError::LvNoSpaceStriped.into())
    );
    assert_eq!(
        m.create_lvm_lv("system", "home", 600, 1),
        Ok("/dev/system/home".to_string())
    );
    assert_eq!(
        m.create_lvm_lv("system", "home", 10, 1),
        Err(LvmError::LvDuplicateName.into())
    );
    assert_eq!(
        m.create_lvm_lv("system", "bad name", 10, 1),
        Err(LvmError::LvInvalidName.into())
    );
    assert_eq!(
        m.create_lvm_lv("system", "tiny", 0, 1),
        Err(LvmError::CreateLvInvalidVolume.into())
    );

    let names: Vec<String> = m
        .get_logical_volumes("system")
        .expect("vg")
        .into_iter()
        .map(|lv| lv.name)
        .collect();
    assert_eq!(names, ["root", "home"]);

    m.commit().expect("commit");
    assert_eq!(
        lab.runner.executed(),
        [
            "parted -s /dev/sdb unit cyl mkpart primary 0 499",
            "sfdisk --part-type /dev/sdb 1 8e",
            "pvcreate -ff -y /dev/sdb1",
            "vgextend system /dev/sdb1",
            "lvcreate -l 150 -n home system",
        ]
    );
    let vg = lab
        .manager
        .staging()
        .committed()
        .volume_group("system")
        .expect("vg");
    assert_eq!((vg.total_pe(), vg.free_pe()), (225, 25));
}

#[test]
fn removing_a_group_removes_its_volumes_and_members() {
    let mut lab = lab(ScriptedRunner::new());
    lab.manager.remove_lvm_vg("system").expect("remove vg");
    assert_eq!(
        lab.manager.get_commit_actions(true),
        [
            "[destructive] Remove logical volume /dev/system/root",
            "[destructive] Remove volume group system",
        ]
    );
    lab.manager
        .remove_partition("/dev/sda2")
        .expect("no longer a member");

    lab.manager.commit().expect("commit");
    assert_eq!(
        lab.runner.executed(),
        [
            "umount /dev/system/root",
            "lvremove -f system/root",
            "vgremove -f system",
            "pvremove -y /dev/sda2",
            "parted -s /dev/sda rm 2",
        ]
    );
    assert_eq!(mount_points(&lab.table), ["/boot"]);
    assert!(lab.manager.get_volume_groups().is_empty());
}

#[test]
fn new_group_initializes_every_member() {
    let mut lab = lab(ScriptedRunner::new());
    let first = pv_on_sdb(&mut lab, 0, 500);
    let second = pv_on_sdb(&mut lab, 500, 500);

    let m = &mut lab.manager;
    assert_eq!(
        m.create_lvm_vg("data", 4096, false, &[first.as_str(), first.as_str()]),
        Err(LvmError::PvAlreadyContained.into())
    );
    assert_eq!(
        m.create_lvm_vg("data", 3000, false, &[first.as_str()]),
        Err(LvmError::PeSizeInvalid.into())
    );
    assert_eq!(
        m.create_lvm_vg("data", 4096, false, &[]),
        Err(LvmError::VgHasNonePv.into())
    );
    assert_eq!(
        m.create_lvm_vg("data", 4096, false, &["/dev/system/root"]),
        Err(ManagerError::LvmInvalidDevice.into())
    );
    assert_eq!(
        m.create_lvm_vg("data", 4096, false, &["/dev/sda2"]),
        Err(LvmError::PvAlreadyContained.into())
    );
    assert_eq!(
        m.create_lvm_vg("data", 4096, false, &["/dev/sda1"]),
        Err(LvmError::PvDeviceUsed.into())
    );
    assert_eq!(
        m.create_lvm_vg("system", 4096, false, &[first.as_str()]),
        Err(ManagerError::LvmVgExists.into())
    );
    assert_eq!(
        m.create_lvm_vg("da ta", 4096, false, &[first.as_str()]),
        Err(ManagerError::VgInvalidName.into())
    );

    m.create_lvm_vg("data", 4096, false, &[first.as_str(), second.as_str()])
        .expect("create vg");
    m.commit().expect("commit");
    let executed = lab.runner.executed();
    assert!(executed.ends_with(&[
        "pvcreate -ff -y /dev/sdb1".to_string(),
        "pvcreate -ff -y /dev/sdb2".to_string(),
        "vgcreate -s 4096k data /dev/sdb1 /dev/sdb2".to_string(),
    ]));
    assert_eq!(
        lab.manager.get_volume_groups(),
        ["system".to_string(), "data".to_string()]
    );
}

#[test]
fn shrinking_a_group_keeps_its_volumes_covered() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.shrink_lvm_vg("system", &[]),
        Err(LvmError::PvNotFound.into())
    );
    assert_eq!(
        m.shrink_lvm_vg("system", &["/dev/sdb1"]),
        Err(LvmError::PvNotFound.into())
    );
    assert_eq!(
        m.shrink_lvm_vg("system", &["/dev/sda2"]),
        Err(LvmError::VgHasNonePv.into())
    );
    assert_eq!(
        m.shrink_lvm_vg("nosuch", &["/dev/sda2"]),
        Err(ManagerError::LvmVgNotFound.into())
    );

    let pv = pv_on_sdb(&mut lab, 0, 500);
    let m = &mut lab.manager;
    m.extend_lvm_vg("system", &[pv.as_str()]).expect("extend");
    m.create_lvm_lv("system", "home", 600, 1).expect("home");
    assert_eq!(
        m.shrink_lvm_vg("system", &[pv.as_str()]),
        Err(LvmError::RemovePvSizeNeeded.into())
    );

    m.remove_lvm_lv_by_name("system", "home").expect("drop home");
    m.shrink_lvm_vg("system", &["/dev/sda2"])
        .expect("root fits on sdb1");
    m.commit().expect("commit");
    assert!(lab.runner.ran("vgreduce system /dev/sda2"));
    assert!(lab.runner.ran("pvremove -y /dev/sda2"));
    assert!(!lab.runner.ran("lvcreate"));
}

#[test]
fn volumes_are_removed_by_name_or_device() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.remove_lvm_lv_by_name("nosuch", "root"),
        Err(ManagerError::LvmVgNotFound.into())
    );
    assert_eq!(
        m.remove_lvm_lv_by_name("system", "home"),
        Err(LvmError::LvUnknownName.into())
    );

    let home = m.create_lvm_lv("system", "home", 100, 1).expect("home");
    m.remove_lvm_lv(&home).expect("cancel the creation");
    assert!(m.get_commit_actions(false).is_empty());

    m.remove_lvm_lv_by_name("system", "root").expect("remove root");
    assert_eq!(
        m.get_commit_actions(false),
        ["Remove logical volume /dev/system/root"]
    );
    assert!(m.get_logical_volumes("system").expect("vg").is_empty());
}
