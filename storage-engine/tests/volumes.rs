mod common;

use std::fs;

use common::{lab, two_disk};
use storage_contracts::{DiskError, FstabError, LvmError, StorageInterface, VolumeError};
use storage_engine::{EngineConfig, StorageManager};
use storage_sys::{FstabFile, FstabLine};
use storage_testing::ScriptedRunner;
use storage_types::{FsType, FstabOptions, MountBy, PartitionType};

fn line<'a>(lines: &'a [FstabLine], mount_point: &str) -> &'a FstabLine {
    lines
        .iter()
        .find(|l| l.mount_point == mount_point)
        .expect("mount table line")
}

#[test]
fn reformat_rewrites_the_mount_table_entry() {
    let mut lab = lab(ScriptedRunner::new());
    lab.manager
        .change_format_volume("/dev/sda1", true, FsType::Vfat)
        .expect("vfat fits");
    assert_eq!(
        lab.manager.get_commit_actions(true),
        [
            "[destructive] Format /dev/sda1 with vfat",
            "Set mount point of /dev/sda1 to /boot",
        ]
    );

    lab.manager.commit().expect("commit");
    assert_eq!(
        lab.runner.executed(),
        ["umount /dev/sda1", "wipefs -a /dev/sda1", "mkfs.vfat /dev/sda1"]
    );
    let lines = lab.table.lines();
    let boot = line(&lines, "/boot");
    assert_eq!(boot.fs_type, "vfat");
    assert_eq!(boot.passno, 0);

    let volume = lab
        .manager
        .staging()
        .committed()
        .volume("/dev/sda1")
        .expect("sda1");
    assert_eq!(volume.detected_fs, FsType::Vfat);
    assert!(!volume.mounted);
    assert!(!volume.fstab_dirty("/dev/sda1"));
}

#[test]
fn format_requests_are_checked_against_the_filesystem() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.change_format_volume("/dev/sda1", true, FsType::Xfs),
        Err(VolumeError::FormatFsTooSmall.into())
    );
    assert_eq!(
        m.change_format_volume("/dev/sda1", true, FsType::Unknown),
        Err(VolumeError::FormatUnknownFs.into())
    );
    assert_eq!(
        m.change_format_volume("/dev/sda2", true, FsType::Ext4),
        Err(VolumeError::AlreadyInUse.into())
    );

    m.create_partition("/dev/sdb", PartitionType::Extended, 0, 1000)
        .expect("extended");
    assert_eq!(
        m.change_format_volume("/dev/sdb1", true, FsType::Ext4),
        Err(VolumeError::FormatExtendedUnsupported.into())
    );
    assert_eq!(
        m.change_mount_point("/dev/sdb1", "/data"),
        Err(VolumeError::MountExtendedUnsupported.into())
    );
}

#[test]
fn label_rules_follow_the_capability_catalog() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.change_label("/dev/sda1", "a-label-far-too-long-for-ext4"),
        Err(VolumeError::LabelTooLong.into())
    );
    assert_eq!(
        m.change_label("/dev/sda2", "pv"),
        Err(VolumeError::AlreadyInUse.into())
    );
    let fresh = m
        .create_partition("/dev/sdb", PartitionType::Primary, 0, 100)
        .expect("create");
    assert_eq!(
        m.change_label(&fresh, "data"),
        Err(VolumeError::LabelNotSupported.into())
    );

    m.change_format_volume(&fresh, true, FsType::Vfat)
        .expect("vfat");
    m.change_label(&fresh, "EFI").expect("label folds into format");
    assert_eq!(
        m.get_commit_actions(false),
        ["Create primary partition /dev/sdb1 (100.00 MB)", "Format /dev/sdb1 with vfat"]
    );

    m.change_label("/dev/sda1", "boot").expect("ext4 relabels mounted");
    m.commit().expect("commit");
    assert!(lab.runner.ran("mkfs.vfat -n EFI /dev/sdb1"));
    assert!(lab.runner.ran("tune2fs -L boot /dev/sda1"));
}

#[test]
fn mount_points_are_absolute_and_unique() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.change_mount_point("/dev/sda1", "/"),
        Err(FstabError::AddEntryFound.into())
    );
    assert_eq!(
        m.change_mount_point("/dev/sda1", "boot"),
        Err(VolumeError::MountPointInvalid.into())
    );
    assert_eq!(
        m.change_mount_point("/dev/sda2", "/srv"),
        Err(VolumeError::AlreadyInUse.into())
    );

    m.change_mount_point("/dev/sda1", "").expect("unlist");
    assert_eq!(
        m.get_commit_actions(false),
        ["Remove /dev/sda1 from the mount table"]
    );
    assert_eq!(m.get_mount_point("/dev/sda1"), Ok(String::new()));
    m.commit().expect("commit");
    assert_eq!(common::mount_points(&lab.table), ["/"]);
}

#[test]
fn swap_areas_share_the_swap_mount_point() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    for start in [0, 100] {
        let device = m
            .create_partition("/dev/sdb", PartitionType::Primary, start, 100)
            .expect("create");
        m.change_format_volume(&device, true, FsType::Swap)
            .expect("swap");
        m.change_mount_point(&device, "swap").expect("swap entry");
    }
    m.commit().expect("commit");

    let swaps: Vec<String> = lab
        .table
        .lines()
        .into_iter()
        .filter(|l| l.mount_point == "swap")
        .map(|l| l.spec)
        .collect();
    assert_eq!(swaps, ["/dev/sdb1", "/dev/sdb2"]);
    assert!(lab.runner.ran("mkswap /dev/sdb2"));
}

#[test]
fn mount_by_uuid_uses_the_detected_uuid() {
    let mut lab = lab(ScriptedRunner::new());
    lab.manager
        .change_mount_by("/dev/sda1", MountBy::Uuid)
        .expect("ext4 has a uuid");
    assert_eq!(lab.manager.get_mount_by("/dev/sda1"), Ok(MountBy::Uuid));
    lab.manager.commit().expect("commit");

    let lines = lab.table.lines();
    assert_eq!(
        line(&lines, "/boot").spec,
        "UUID=6b1f0c3e-5d0a-4a1e-9d55-0f6c1b1f2a01"
    );
    assert!(lab.runner.executed().is_empty());

    let fat = lab
        .manager
        .create_partition("/dev/sdb", PartitionType::Primary, 0, 100)
        .expect("create");
    lab.manager
        .change_format_volume(&fat, true, FsType::Vfat)
        .expect("vfat");
    assert_eq!(
        lab.manager.change_mount_by(&fat, MountBy::Uuid),
        Err(VolumeError::MountbyUnsupportedByFs.into())
    );
}

#[test]
fn encrypted_volume_needs_a_usable_password() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.set_crypt("/dev/sda1", true),
        Err(VolumeError::CryptFormatRequired.into())
    );

    let device = m
        .create_partition("/dev/sdb", PartitionType::Primary, 0, 200)
        .expect("create");
    m.change_format_volume(&device, true, FsType::Ext4)
        .expect("format");
    m.set_crypt(&device, true).expect("crypt");
    m.change_mount_point(&device, "/secure").expect("mount");
    assert_eq!(m.get_crypt(&device), Ok(true));
    assert!(
        m.get_commit_actions(false)
            .contains(&"Format /dev/sdb1 with ext4 (encrypted)".to_string())
    );

    assert_eq!(m.commit().map(drop), Err(VolumeError::CryptNoPwd.into()));
    m.set_crypt_password(&device, "abc").expect("short password");
    assert_eq!(
        m.commit().map(drop),
        Err(VolumeError::CryptPwdTooShort.into())
    );
    assert_eq!(m.get_commit_actions(false).len(), 3);

    m.set_crypt_password(&device, "correct horse").expect("password");
    m.commit().expect("commit");
    assert_eq!(
        lab.runner.executed(),
        [
            "parted -s /dev/sdb unit cyl mkpart primary 0 199",
            "wipefs -a /dev/sdb1",
            "cryptsetup -q --key-file=- luksFormat /dev/sdb1",
            "cryptsetup --key-file=- luksOpen /dev/sdb1 cr_sdb1",
            "mkfs.ext4 -F /dev/mapper/cr_sdb1",
            "cryptsetup luksClose cr_sdb1",
        ]
    );
    assert!(common::mount_points(&lab.table).contains(&"/secure".to_string()));
    let volume = lab
        .manager
        .staging()
        .committed()
        .volume(&device)
        .expect("committed");
    assert!(volume.password.is_none());
    assert!(volume.encryption.is_encrypted());
}

#[test]
fn option_patterns_rewrite_the_fstab_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("fstab");
    fs::write(
        &path,
        "# managed by hand\n\
         /dev/sda1 /boot ext4 noatime,uid=500,gid=100 0 2\n\
         /dev/system/root / ext4 defaults 0 1\n",
    )
    .expect("seed fstab");

    let mut model = two_disk();
    let options = FstabOptions::parse("noatime,uid=500,gid=100");
    let boot = &mut model.disks[0].partitions[0].volume;
    boot.fstab_options = options.clone();
    if let Some(entry) = boot.persisted.as_mut() {
        entry.options = options;
    }

    let mut manager = StorageManager::new(
        model,
        Box::new(ScriptedRunner::new()),
        Box::new(FstabFile::new(&path, dir.path())),
        &EngineConfig::default(),
    );
    manager
        .remove_fstab_options("/dev/sda1", "uid=.*,gid=.*")
        .expect("remove options");
    assert_eq!(manager.get_fstab_options("/dev/sda1"), Ok("noatime".to_string()));
    manager
        .add_fstab_options("/dev/sda1", "nodev")
        .expect("add option");
    manager.commit().expect("commit");

    let text = fs::read_to_string(&path).expect("read back");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# managed by hand");
    assert_eq!(lines[2], "/dev/system/root / ext4 defaults 0 1");
    let boot = FstabLine::parse(lines[1]).expect("boot line");
    assert_eq!(boot.spec, "/dev/sda1");
    assert_eq!(boot.mount_point, "/boot");
    assert_eq!(boot.options, "noatime,nodev");
    assert_eq!(boot.passno, 2);
}

#[test]
fn resize_checks_space_and_filesystem() {
    let mut lab = lab(ScriptedRunner::new());
    let m = &mut lab.manager;
    assert_eq!(
        m.resize_volume("/dev/sda1", 50),
        Err(VolumeError::ResizeUnsupportedByFs.into())
    );
    assert_eq!(
        m.resize_volume("/dev/sda1", 150),
        Err(DiskError::ResizeNoSpace.into())
    );
    assert_eq!(
        m.resize_volume("/dev/sda1", 0),
        Err(VolumeError::ResizeTooSmall.into())
    );
    assert_eq!(
        m.resize_volume("/dev/system/root", 500),
        Err(LvmError::LvNoSpace.into())
    );
    assert_eq!(
        m.resize_volume("/dev/system/root", 0),
        Err(LvmError::ResizeLvInvalidVolume.into())
    );

    m.resize_volume("/dev/system/root", 400).expect("grow online");
    assert_eq!(
        m.get_commit_actions(true),
        ["Grow logical volume /dev/system/root to 400.00 MB"]
    );
    m.commit().expect("commit");
    assert_eq!(
        lab.runner.executed(),
        [
            "lvresize -f -l 100 system/root",
            "resize2fs -p /dev/system/root 409600K",
        ]
    );
    let vg = lab
        .manager
        .staging()
        .committed()
        .volume_group("system")
        .expect("vg");
    assert_eq!(vg.free_pe(), 0);
}

#[test]
fn shrinking_a_partition_shrinks_the_filesystem_first() {
    let mut model = two_disk();
    model.disks[0].partitions[0].volume.mounted = false;
    let mut lab = common::lab_with(model, ScriptedRunner::new(), &EngineConfig::default());

    lab.manager.resize_volume("/dev/sda1", 60).expect("shrink");
    assert_eq!(
        lab.manager.get_commit_actions(true),
        ["[destructive] Shrink partition /dev/sda1 to 60.00 MB"]
    );
    lab.manager.commit().expect("commit");
    assert_eq!(
        lab.runner.executed(),
        [
            "resize2fs -p /dev/sda1 61440K",
            "parted -s /dev/sda unit cyl resizepart 1 59",
        ]
    );
}
