// SPDX-License-Identifier: GPL-3.0-only

pub mod codes;
pub mod errors;
pub mod ids;
pub mod operations;

pub use codes::{ContainerError, DiskError, FstabError, LvmError, ManagerError, VolumeError};
pub use errors::{StorageError, StorageErrorKind};
pub use ids::CommitId;
pub use operations::{ActionRecord, CommitReport, PartialCommit};
