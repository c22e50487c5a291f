use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_types::DeviceModel;

use crate::errors::{Result, TestingError};

/// A named device layout for engine tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub model: DeviceModel,
}

pub fn workspace_root() -> PathBuf {
    if let Ok(value) = std::env::var("STORAGE_TESTING_WORKSPACE_ROOT") {
        return PathBuf::from(value);
    }

    if let Ok(current_dir) = std::env::current_dir()
        && current_dir.join("resources/lab-specs").exists()
    {
        return current_dir;
    }

    let manifest_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    if manifest_root.join("resources/lab-specs").exists() {
        return manifest_root;
    }

    PathBuf::from(".")
}

pub fn specs_root() -> PathBuf {
    workspace_root().join("resources/lab-specs")
}

pub fn spec_path_for_name(spec_name: &str) -> PathBuf {
    specs_root().join(format!("{}.toml", spec_name))
}

pub fn load_by_name(spec_name: &str) -> Result<LabSpec> {
    let path = spec_path_for_name(spec_name);
    if !path.exists() {
        return Err(TestingError::SpecNotFound {
            spec_name: spec_name.to_string(),
        });
    }

    let raw = fs::read_to_string(&path).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    let spec: LabSpec = toml::from_str(&raw).map_err(|error| TestingError::SpecInvalid {
        spec_name: spec_name.to_string(),
        reason: error.to_string(),
    })?;

    validate(&spec)?;
    Ok(spec)
}

/// Device model of the named spec
pub fn model(spec_name: &str) -> Result<DeviceModel> {
    load_by_name(spec_name).map(|spec| spec.model)
}

pub fn validate(spec: &LabSpec) -> Result<()> {
    let invalid = |reason: String| TestingError::SpecInvalid {
        spec_name: spec.name.clone(),
        reason,
    };

    if spec.name.is_empty() {
        return Err(TestingError::SpecInvalid {
            spec_name: "<unknown>".to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if spec.model.disks.is_empty() {
        return Err(invalid("disks must not be empty".to_string()));
    }

    for disk in &spec.model.disks {
        if disk.cyl_size == 0 || disk.cylinders == 0 {
            return Err(invalid(format!("{} has no geometry", disk.device)));
        }
        for partition in &disk.partitions {
            if partition.region.start + partition.region.len > disk.cylinders {
                return Err(invalid(format!(
                    "{} ends past the end of {}",
                    partition.device, disk.device
                )));
            }
        }
    }

    for vg in &spec.model.volume_groups {
        if vg.used_pe() > vg.total_pe() {
            return Err(invalid(format!("{} is overcommitted", vg.name)));
        }
    }

    Ok(())
}
