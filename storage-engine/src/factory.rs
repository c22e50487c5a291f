// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use storage_contracts::StorageInterface;
use storage_sys::{
    DryRunRunner, FstabFile, MemoryMountTable, MountTable, SystemToolRunner, ToolRunner, detect,
    read_mountinfo,
};
use storage_types::DeviceModel;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::manager::StorageManager;

/// Read a device model dumped with [`save_snapshot`]
pub fn load_snapshot(path: &Path) -> Result<DeviceModel> {
    let raw = fs::read_to_string(path).map_err(|e| EngineError::Snapshot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&raw).map_err(|e| EngineError::Snapshot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn save_snapshot(model: &DeviceModel, path: &Path) -> Result<()> {
    let raw = toml::to_string_pretty(model).map_err(|e| EngineError::Snapshot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, raw).map_err(|e| EngineError::Snapshot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Initial model: the snapshot if one is configured, else detection,
/// else an empty system.
pub fn load_model(config: &EngineConfig) -> Result<DeviceModel> {
    if let Some(snapshot) = &config.snapshot {
        info!("Loading device model from {}", snapshot.display());
        return load_snapshot(snapshot);
    }
    if !config.autodetect {
        warn!("Autodetection disabled and no snapshot given, starting empty");
        return Ok(DeviceModel::default());
    }
    let mut runner = SystemToolRunner::with_overrides(config.tools.clone());
    let table = FstabFile::new(config.fstab_path(), &config.root);
    Ok(detect(&mut runner, &table, &read_mountinfo()?)?)
}

pub fn create_storage_manager(config: &EngineConfig) -> Result<StorageManager> {
    let model = load_model(config)?;

    let (runner, table): (Box<dyn ToolRunner>, Box<dyn MountTable>) = if config.test_mode {
        info!("Test mode: tools are logged, the mount table stays in memory");
        let table = MemoryMountTable::from_entries(
            model.volumes().filter_map(|(_, volume)| volume.persisted.as_ref()),
        );
        (Box::new(DryRunRunner::new()), Box::new(table))
    } else {
        (
            Box::new(SystemToolRunner::with_overrides(config.tools.clone())),
            Box::new(FstabFile::new(config.fstab_path(), &config.root)),
        )
    };

    Ok(StorageManager::new(model, runner, table, config))
}

pub fn create_storage_interface(config: &EngineConfig) -> Result<Box<dyn StorageInterface>> {
    Ok(Box::new(create_storage_manager(config)?))
}
