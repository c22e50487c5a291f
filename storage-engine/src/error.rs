// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use storage_contracts::StorageError;
use storage_sys::SysError;
use thiserror::Error;

/// Failures while setting up a manager. Planning and commit failures are
/// [`StorageError`]s.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("invalid snapshot {path:?}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("invalid request plan {path:?}: {reason}")]
    Plan { path: PathBuf, reason: String },

    #[error("device detection failed: {0}")]
    Detection(#[from] SysError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
