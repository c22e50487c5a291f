// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::codes::{ContainerError, DiskError, FstabError, LvmError, ManagerError, VolumeError};
use super::operations::PartialCommit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Unsupported,
    ReadOnly,
    /// An external tool exited non-zero; real state may have changed
    ToolFailed,
    /// The queue was empty, not a failure as such
    NothingToDo,
    /// Some actions committed before one failed
    PartialCommit,
    Internal,
}

impl StorageErrorKind {
    /// Planning-time errors leave the real system untouched
    pub fn is_planning(self) -> bool {
        matches!(
            self,
            Self::InvalidInput | Self::NotFound | Self::Conflict | Self::Unsupported | Self::ReadOnly
        )
    }
}

/// Result vocabulary shared by every layer of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "subsystem", content = "error")]
pub enum StorageError {
    #[error(transparent)]
    Disk(#[from] DiskError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error(transparent)]
    Lvm(#[from] LvmError),

    #[error(transparent)]
    Fstab(#[from] FstabError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("{0}")]
    PartialCommit(Box<PartialCommit>),
}

impl StorageError {
    /// Negative integer code; a partial commit reports its cause's code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Disk(e) => e.code(),
            Self::Manager(e) => e.code(),
            Self::Volume(e) => e.code(),
            Self::Lvm(e) => e.code(),
            Self::Fstab(e) => e.code(),
            Self::Container(e) => e.code(),
            Self::PartialCommit(partial) => partial.cause.code(),
        }
    }

    pub fn kind(&self) -> StorageErrorKind {
        match self {
            Self::Disk(e) => e.kind(),
            Self::Manager(e) => e.kind(),
            Self::Volume(e) => e.kind(),
            Self::Lvm(e) => e.kind(),
            Self::Fstab(e) => e.kind(),
            Self::Container(e) => e.kind(),
            Self::PartialCommit(_) => StorageErrorKind::PartialCommit,
        }
    }

    /// The error that stopped a commit, or `self` for any other error
    pub fn cause(&self) -> &StorageError {
        match self {
            Self::PartialCommit(partial) => partial.cause.cause(),
            other => other,
        }
    }

    pub fn as_partial(&self) -> Option<&PartialCommit> {
        match self {
            Self::PartialCommit(partial) => Some(partial),
            _ => None,
        }
    }

    pub fn is_nothing_to_do(&self) -> bool {
        self.kind() == StorageErrorKind::NothingToDo
    }
}

impl From<PartialCommit> for StorageError {
    fn from(partial: PartialCommit) -> Self {
        Self::PartialCommit(Box::new(partial))
    }
}
