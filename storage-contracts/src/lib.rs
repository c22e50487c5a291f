// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{
    ActionRecord, CommitId, CommitReport, ContainerError, DiskError, FstabError, LvmError,
    ManagerError, PartialCommit, StorageError, StorageErrorKind, VolumeError,
};
pub use traits::{
    Callbacks, Diagnostic, HandlerError, HandlerResult, ProgressHandler, StorageInterface,
    StorageResult, TARGET_TEXT_LEN, sanitize_target,
};
