mod common;

use common::{lab, lab_with, two_disk};
use storage_contracts::{StorageInterface, VolumeError};
use storage_engine::{EngineConfig, Plan};
use storage_testing::ScriptedRunner;
use storage_types::{FsType, Partition, PartitionType, Region, Volume, ids};

const DATA_DISK: &str = r#"
[[request]]
op = "create_partition"
disk = "/dev/sdb"
kind = "primary"
start_cyl = 0
size_cyl = 300

[[request]]
op = "format"
device = "/dev/sdb1"
fs = "ext4"

[[request]]
op = "label"
device = "/dev/sdb1"
label = "data"

[[request]]
op = "mount_point"
device = "/dev/sdb1"
mount_point = "/data"

[[request]]
op = "add_fstab_options"
device = "/dev/sdb1"
options = "noatime"
"#;

#[test]
fn plan_requests_stage_like_direct_calls() {
    let plan = Plan::parse(DATA_DISK).expect("valid plan");
    let mut lab = lab(ScriptedRunner::new());

    let created: Vec<Option<String>> = plan
        .requests
        .iter()
        .map(|request| request.apply(&mut lab.manager).expect("request accepted"))
        .collect();
    assert_eq!(created[0].as_deref(), Some("/dev/sdb1"));
    assert!(created[1..].iter().all(Option::is_none));

    assert_eq!(
        lab.manager.get_commit_actions(false),
        [
            "Create primary partition /dev/sdb1 (300.00 MB)",
            "Format /dev/sdb1 with ext4",
            "Set mount point of /dev/sdb1 to /data",
        ]
    );
    lab.manager.commit().expect("commit");
    assert!(lab.runner.ran("mkfs.ext4 -F -L data /dev/sdb1"));

    let line = lab
        .table
        .lines()
        .into_iter()
        .find(|l| l.mount_point == "/data")
        .expect("data entry");
    assert_eq!(line.options, "noatime");
    assert_eq!(line.passno, 2);
}

#[test]
fn rejected_request_reports_its_code() {
    let plan = Plan::parse(
        r#"
[[request]]
op = "format"
device = "/dev/sda2"
fs = "ext4"
"#,
    )
    .expect("valid plan");
    let mut lab = lab(ScriptedRunner::new());
    let error = plan.requests[0]
        .apply(&mut lab.manager)
        .expect_err("sda2 is a physical volume");
    assert_eq!(error.code(), VolumeError::AlreadyInUse.code());
    assert!(lab.manager.get_commit_actions(false).is_empty());
}

const BESIDE_WINDOWS: &str = r#"
[[request]]
op = "make_space"
disks = ["/dev/sdb"]
size_k = 512000
shrink_windows = true

[[request]]
op = "create_partition_any"
disk = "/dev/sdb"
size_k = 512000

[[request]]
op = "format"
device = "/dev/sdb2"
fs = "ext4"
"#;

#[test]
fn windows_partition_makes_room_for_a_new_one() {
    let mut model = two_disk();
    model
        .disk_mut("/dev/sdb")
        .expect("sdb")
        .insert_partition(Partition {
            device: "/dev/sdb1".to_string(),
            number: 1,
            kind: PartitionType::Primary,
            region: Region::new(0, 1800),
            id: ids::NTFS,
            volume: Volume::detected(1800 * 1024, FsType::Ntfs),
        });
    let mut lab = lab_with(model, ScriptedRunner::new(), &EngineConfig::default());

    let plan = Plan::parse(BESIDE_WINDOWS).expect("valid plan");
    for request in &plan.requests {
        request.apply(&mut lab.manager).expect("request accepted");
    }
    let partitions = lab.manager.get_partitions_on("/dev/sdb").expect("sdb");
    let regions: Vec<(u64, u64)> = partitions
        .iter()
        .map(|p| (p.cyl_start, p.cyl_size))
        .collect();
    assert_eq!(regions, [(0, 1500), (1500, 500)]);

    lab.manager.commit().expect("commit");
    let executed = lab.runner.executed();
    let position = |pattern: &str| {
        executed
            .iter()
            .position(|c| c.contains(pattern))
            .unwrap_or_else(|| panic!("{pattern} never ran"))
    };
    assert!(position("ntfsresize") < position("resizepart 1 1499"));
    assert!(position("resizepart 1 1499") < position("mkpart primary 1500 1999"));
    assert!(lab.runner.ran("mkfs.ext4 -F /dev/sdb2"));
}
