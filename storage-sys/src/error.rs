// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Mount table {path:?} has no entry for {mount_point}")]
    EntryNotFound { path: PathBuf, mount_point: String },

    #[error("Mount table {path:?} already has an entry for {mount_point}")]
    EntryExists { path: PathBuf, mount_point: String },
}

impl SysError {
    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
