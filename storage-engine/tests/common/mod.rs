#![allow(dead_code)]

use storage_engine::{EngineConfig, StorageManager};
use storage_testing::{MemoryMountTable, ScriptedRunner, spec};
use storage_types::{DeviceModel, Disk, PartitionTable};

/// A manager wired to test doubles the test keeps handles to
pub struct Lab {
    pub manager: StorageManager,
    pub runner: ScriptedRunner,
    pub table: MemoryMountTable,
}

pub fn two_disk() -> DeviceModel {
    spec::model("two-disk").expect("two-disk lab spec")
}

/// One msdos disk of `cylinders` 1 MiB cylinders and nothing on it
pub fn blank(cylinders: u64) -> DeviceModel {
    DeviceModel {
        disks: vec![Disk::new(
            "/dev/sdc",
            1024 * 1024,
            cylinders,
            PartitionTable::Msdos,
        )],
        volume_groups: Vec::new(),
    }
}

pub fn lab(runner: ScriptedRunner) -> Lab {
    lab_with(two_disk(), runner, &EngineConfig::default())
}

pub fn lab_with(model: DeviceModel, runner: ScriptedRunner, config: &EngineConfig) -> Lab {
    let table = MemoryMountTable::from_entries(
        model
            .volumes()
            .filter_map(|(_, volume)| volume.persisted.as_ref()),
    );
    let manager = StorageManager::new(
        model,
        Box::new(runner.clone()),
        Box::new(table.clone()),
        config,
    );
    Lab {
        manager,
        runner,
        table,
    }
}

pub fn mount_points(table: &MemoryMountTable) -> Vec<String> {
    table
        .lines()
        .into_iter()
        .map(|line| line.mount_point)
        .collect()
}
