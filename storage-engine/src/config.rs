// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_types::PartitionTable;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "STORAGE_ENGINE_CONFIG";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Refuse every mutation
    pub read_only: bool,

    /// Log tool invocations instead of running them; mount-table edits
    /// stay in memory
    pub test_mode: bool,

    /// Probe the running system when no snapshot is given
    pub autodetect: bool,

    /// Initial cache mode of a new manager
    pub cache_changes: bool,

    /// TOML dump of a device model to start from instead of detection
    pub snapshot: Option<PathBuf>,

    /// Mount table, relative to `root`
    pub fstab: PathBuf,

    /// Prefix for every path the engine touches
    pub root: PathBuf,

    pub default_label: PartitionTable,

    pub min_password_len: usize,

    /// Absolute paths for tools that are not on `PATH`
    pub tools: HashMap<String, PathBuf>,

    pub log_level: LoggingLevel,

    pub log_to_disk: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            test_mode: false,
            autodetect: true,
            cache_changes: true,
            snapshot: None,
            fstab: PathBuf::from("/etc/fstab"),
            root: PathBuf::from("/"),
            default_label: PartitionTable::Msdos,
            min_password_len: 5,
            tools: HashMap::new(),
            log_level: LoggingLevel::Info,
            log_to_disk: true,
        }
    }
}

impl EngineConfig {
    /// Load from `path`, else from [`CONFIG_ENV`], else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        match path {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| EngineError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Mount table location with the root prefix applied
    pub fn fstab_path(&self) -> PathBuf {
        let relative = self.fstab.strip_prefix("/").unwrap_or(&self.fstab);
        self.root.join(relative)
    }
}
