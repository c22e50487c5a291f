// SPDX-License-Identifier: GPL-3.0-only

//! Per-subsystem error codes
//!
//! Every enum is `repr(i32)` with its wire code as discriminant, so a
//! variant and its number can never drift apart. Each subsystem owns a
//! reserved range: disk -1000, manager -2000, volume -3000, LVM -4000,
//! fstab -5000, container -99000.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::errors::StorageErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum DiskError {
    #[error("partition overlaps an existing partition")]
    CreatePartitionOverlapsExisting = -1000,
    #[error("partition exceeds the end of the disk")]
    CreatePartitionExceedsDisk = -1001,
    #[error("only one extended partition is allowed per disk")]
    CreatePartitionExtOnlyOnce = -1002,
    #[error("partition table does not support extended partitions")]
    CreatePartitionExtImpossible = -1003,
    #[error("no free partition number")]
    CreatePartitionNoFreeNumber = -1004,
    #[error("invalid volume for partition creation")]
    CreatePartitionInvalidVolume = -1005,
    #[error("invalid partition type")]
    CreatePartitionInvalidType = -1006,
    #[error("creating the partition failed")]
    CreatePartitionPartedFailed = -1007,
    #[error("created partition not found")]
    CreatePartitionNotFound = -1008,
    #[error("logical partition requires an extended partition")]
    CreatePartitionLogicalNoExt = -1009,
    #[error("logical partition lies outside the extended partition")]
    CreatePartitionLogicalOutsideExt = -1010,
    #[error("invalid volume for partition id change")]
    SetTypeInvalidVolume = -1011,
    #[error("setting the partition id failed")]
    SetTypePartedFailed = -1012,
    #[error("writing the partition table label failed")]
    SetLabelPartedFailed = -1013,
    #[error("partition to remove not found")]
    RemovePartitionNotFound = -1014,
    #[error("removing the partition failed")]
    RemovePartitionPartedFailed = -1015,
    #[error("invalid volume for partition removal")]
    RemovePartitionInvalidVolume = -1016,
    #[error("partition could not be dropped from the disk")]
    RemovePartitionListErase = -1017,
    #[error("partition for id change not found")]
    ChangePartitionIdNotFound = -1018,
    #[error("unknown partition table label")]
    DestroyTableInvalidLabel = -1019,
    #[error("partition size is zero")]
    CreatePartitionZeroSize = -1020,
    #[error("disk is read-only")]
    ChangeReadonly = -1021,
    #[error("invalid volume for partition resize")]
    ResizePartitionInvalidVolume = -1022,
    #[error("resizing the partition failed")]
    ResizePartitionPartedFailed = -1023,
    #[error("partition to resize not found")]
    ResizePartitionNotFound = -1024,
    #[error("no space to grow the partition")]
    ResizeNoSpace = -1025,
    #[error("invalid volume for resize check")]
    CheckResizeInvalidVolume = -1026,
    #[error("pending partition creation not found")]
    RemovePartitionCreateNotFound = -1027,
    #[error("nothing to commit")]
    CommitNothingTodo = -1028,
    #[error("no free space for the partition")]
    CreatePartitionNoSpace = -1029,
    #[error("higher numbered logical partitions would be renumbered")]
    RemovePartitionLogicalRenumber = -1030,
    #[error("partition is in use by a volume group")]
    RemovePartitionUsedBy = -1031,
}

impl DiskError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn kind(self) -> StorageErrorKind {
        use DiskError::*;
        match self {
            CreatePartitionOverlapsExisting
            | CreatePartitionExtOnlyOnce
            | CreatePartitionNoFreeNumber
            | CreatePartitionNoSpace
            | ResizeNoSpace
            | RemovePartitionLogicalRenumber
            | RemovePartitionUsedBy => StorageErrorKind::Conflict,
            CreatePartitionExceedsDisk
            | CreatePartitionInvalidVolume
            | CreatePartitionInvalidType
            | CreatePartitionLogicalOutsideExt
            | CreatePartitionZeroSize
            | SetTypeInvalidVolume
            | RemovePartitionInvalidVolume
            | ResizePartitionInvalidVolume
            | CheckResizeInvalidVolume
            | DestroyTableInvalidLabel => StorageErrorKind::InvalidInput,
            CreatePartitionExtImpossible | CreatePartitionLogicalNoExt => {
                StorageErrorKind::Unsupported
            }
            CreatePartitionNotFound
            | RemovePartitionNotFound
            | ChangePartitionIdNotFound
            | ResizePartitionNotFound
            | RemovePartitionCreateNotFound => StorageErrorKind::NotFound,
            CreatePartitionPartedFailed
            | SetTypePartedFailed
            | SetLabelPartedFailed
            | RemovePartitionPartedFailed
            | ResizePartitionPartedFailed => StorageErrorKind::ToolFailed,
            ChangeReadonly => StorageErrorKind::ReadOnly,
            CommitNothingTodo => StorageErrorKind::NothingToDo,
            RemovePartitionListErase => StorageErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum ManagerError {
    #[error("disk not found")]
    DiskNotFound = -2000,
    #[error("volume not found")]
    VolumeNotFound = -2001,
    #[error("device is not a partition")]
    RemovePartitionInvalidContainer = -2002,
    #[error("partition id can only be changed on a disk partition")]
    ChangePartitionIdInvalidContainer = -2003,
    #[error("storage manager is read-only")]
    ChangeReadonly = -2004,
    #[error("disk is in use")]
    DiskUsedBy = -2005,
    #[error("volume group already exists")]
    LvmVgExists = -2006,
    #[error("volume group not found")]
    LvmVgNotFound = -2007,
    #[error("device cannot be used as a physical volume")]
    LvmInvalidDevice = -2008,
    #[error("container not found")]
    ContainerNotFound = -2009,
    #[error("invalid volume group name")]
    VgInvalidName = -2010,
}

impl ManagerError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn kind(self) -> StorageErrorKind {
        use ManagerError::*;
        match self {
            DiskNotFound | VolumeNotFound | LvmVgNotFound | ContainerNotFound => {
                StorageErrorKind::NotFound
            }
            RemovePartitionInvalidContainer
            | ChangePartitionIdInvalidContainer
            | LvmInvalidDevice
            | VgInvalidName => StorageErrorKind::InvalidInput,
            ChangeReadonly => StorageErrorKind::ReadOnly,
            DiskUsedBy | LvmVgExists => StorageErrorKind::Conflict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum VolumeError {
    #[error("unknown commit stage")]
    CommitUnknownStage = -3000,
    #[error("mount point is empty")]
    FstabEmptyMount = -3001,
    #[error("unmount failed")]
    UmountFailed = -3002,
    #[error("mount failed")]
    MountFailed = -3003,
    #[error("wiping the device failed")]
    FormatDdFailed = -3004,
    #[error("unknown filesystem type")]
    FormatUnknownFs = -3005,
    #[error("filesystem could not be detected")]
    FormatFsUndetected = -3006,
    #[error("volume is too small for the filesystem")]
    FormatFsTooSmall = -3007,
    #[error("creating the filesystem failed")]
    FormatFailed = -3008,
    #[error("tuning the filesystem failed")]
    Tune2fsFailed = -3009,
    #[error("filesystem does not support labels")]
    MklabelFsUnable = -3010,
    #[error("setting the filesystem label failed")]
    MklabelFailed = -3011,
    #[error("no free loop device")]
    LosetupNoLoop = -3012,
    #[error("setting up the loop device failed")]
    LosetupFailed = -3013,
    #[error("no encryption password set")]
    CryptNoPwd = -3014,
    #[error("encryption password is too short")]
    CryptPwdTooShort = -3015,
    #[error("encryption not detected")]
    CryptNotDetected = -3016,
    #[error("extended partitions cannot be formatted")]
    FormatExtendedUnsupported = -3017,
    #[error("extended partitions cannot be mounted")]
    MountExtendedUnsupported = -3018,
    #[error("invalid mount point")]
    MountPointInvalid = -3019,
    #[error("encrypted volume can only be mounted by device")]
    MountbyNotEncrypted = -3020,
    #[error("filesystem does not support this mount-by method")]
    MountbyUnsupportedByFs = -3021,
    #[error("filesystem does not support labels")]
    LabelNotSupported = -3022,
    #[error("label is too long")]
    LabelTooLong = -3023,
    #[error("label cannot be changed while mounted")]
    LabelWhileMounted = -3024,
    #[error("filesystem does not support this resize")]
    ResizeUnsupportedByFs = -3025,
    #[error("container does not support resizing")]
    ResizeUnsupportedByContainer = -3026,
    #[error("resizing the filesystem failed")]
    ResizeFailed = -3027,
    #[error("volume is already in use")]
    AlreadyInUse = -3028,
    #[error("encryption requires the volume to be formatted")]
    CryptFormatRequired = -3029,
    #[error("setting up encryption failed")]
    CryptsetupFailed = -3030,
    #[error("volume would be smaller than the filesystem minimum")]
    ResizeTooSmall = -3031,
}

impl VolumeError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn kind(self) -> StorageErrorKind {
        use VolumeError::*;
        match self {
            UmountFailed | MountFailed | FormatDdFailed | FormatFailed | Tune2fsFailed
            | MklabelFailed | LosetupFailed | ResizeFailed | CryptsetupFailed => {
                StorageErrorKind::ToolFailed
            }
            FormatUnknownFs
            | MklabelFsUnable
            | FormatExtendedUnsupported
            | MountExtendedUnsupported
            | MountbyNotEncrypted
            | MountbyUnsupportedByFs
            | LabelNotSupported
            | LabelWhileMounted
            | ResizeUnsupportedByFs
            | ResizeUnsupportedByContainer => StorageErrorKind::Unsupported,
            FstabEmptyMount
            | FormatFsTooSmall
            | CryptNoPwd
            | CryptPwdTooShort
            | MountPointInvalid
            | LabelTooLong
            | CryptFormatRequired
            | ResizeTooSmall => StorageErrorKind::InvalidInput,
            FormatFsUndetected | CryptNotDetected | LosetupNoLoop => StorageErrorKind::NotFound,
            AlreadyInUse => StorageErrorKind::Conflict,
            CommitUnknownStage => StorageErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum LvmError {
    #[error("creating the physical volume failed")]
    CreatePvFailed = -4000,
    #[error("invalid physical extent size")]
    PeSizeInvalid = -4001,
    #[error("device already belongs to the volume group")]
    PvAlreadyContained = -4002,
    #[error("physical volume device unknown")]
    PvDeviceUnknown = -4003,
    #[error("physical volume device is in use")]
    PvDeviceUsed = -4004,
    #[error("volume group has no physical volumes")]
    VgHasNonePv = -4005,
    #[error("physical volume not found")]
    PvNotFound = -4006,
    #[error("physical volume space is still needed")]
    RemovePvSizeNeeded = -4007,
    #[error("physical volume is in use")]
    RemovePvInUse = -4008,
    #[error("invalid logical volume name")]
    LvInvalidName = -4009,
    #[error("logical volume name already used")]
    LvDuplicateName = -4010,
    #[error("not enough free extents")]
    LvNoSpace = -4011,
    #[error("not enough free extents for the stripe count")]
    LvNoSpaceStriped = -4012,
    #[error("not enough free extents on a single physical volume")]
    LvNoSpaceSingle = -4013,
    #[error("logical volume not found")]
    LvUnknownName = -4014,
    #[error("physical extent device not found")]
    LvPeDevNotFound = -4015,
    #[error("logical volume not in list")]
    LvNotInList = -4016,
    #[error("creating the volume group failed")]
    VgCreateFailed = -4017,
    #[error("extending the volume group failed")]
    VgExtendFailed = -4018,
    #[error("reducing the volume group failed")]
    VgReduceFailed = -4019,
    #[error("removing the volume group failed")]
    VgRemoveFailed = -4020,
    #[error("creating the logical volume failed")]
    LvCreateFailed = -4021,
    #[error("removing the logical volume failed")]
    LvRemoveFailed = -4022,
    #[error("resizing the logical volume failed")]
    LvResizeFailed = -4023,
    #[error("physical volume is already being added")]
    PvStillAdded = -4024,
    #[error("physical volume to remove not found")]
    PvRemoveNotFound = -4025,
    #[error("invalid volume for logical volume creation")]
    CreateLvInvalidVolume = -4026,
    #[error("invalid volume for logical volume removal")]
    RemoveLvInvalidVolume = -4027,
    #[error("invalid volume for logical volume resize")]
    ResizeLvInvalidVolume = -4028,
    #[error("volume group is read-only")]
    ChangeReadonly = -4029,
    #[error("invalid volume for resize check")]
    CheckResizeInvalidVolume = -4030,
    #[error("nothing to commit")]
    CommitNothingTodo = -4031,
    #[error("removing the physical volume label failed")]
    PvRemoveFailed = -4032,
}

impl LvmError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn kind(self) -> StorageErrorKind {
        use LvmError::*;
        match self {
            CreatePvFailed | VgCreateFailed | VgExtendFailed | VgReduceFailed
            | VgRemoveFailed | LvCreateFailed | LvRemoveFailed | LvResizeFailed
            | PvRemoveFailed => StorageErrorKind::ToolFailed,
            PeSizeInvalid
            | LvInvalidName
            | CreateLvInvalidVolume
            | RemoveLvInvalidVolume
            | ResizeLvInvalidVolume
            | CheckResizeInvalidVolume => StorageErrorKind::InvalidInput,
            PvAlreadyContained | PvDeviceUsed | RemovePvSizeNeeded | RemovePvInUse
            | LvDuplicateName | LvNoSpace | LvNoSpaceStriped | LvNoSpaceSingle
            | PvStillAdded | VgHasNonePv => StorageErrorKind::Conflict,
            PvDeviceUnknown | PvNotFound | LvUnknownName | LvPeDevNotFound | LvNotInList
            | PvRemoveNotFound => StorageErrorKind::NotFound,
            ChangeReadonly => StorageErrorKind::ReadOnly,
            CommitNothingTodo => StorageErrorKind::NothingToDo,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum FstabError {
    #[error("fstab entry not found")]
    EntryNotFound = -5000,
    #[error("cannot change the fstab prefix")]
    ChangePrefixImpossible = -5001,
    #[error("fstab entry to remove not found")]
    RemoveEntryNotFound = -5002,
    #[error("fstab entry to update not found")]
    UpdateEntryNotFound = -5003,
    #[error("fstab entry already exists")]
    AddEntryFound = -5004,
    #[error("writing the mount table failed")]
    WriteFailed = -5005,
    #[error("reading the mount table failed")]
    ReadFailed = -5006,
}

impl FstabError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn kind(self) -> StorageErrorKind {
        match self {
            FstabError::EntryNotFound
            | FstabError::RemoveEntryNotFound
            | FstabError::UpdateEntryNotFound => StorageErrorKind::NotFound,
            FstabError::AddEntryFound => StorageErrorKind::Conflict,
            FstabError::ChangePrefixImpossible => StorageErrorKind::Unsupported,
            FstabError::WriteFailed | FstabError::ReadFailed => StorageErrorKind::ToolFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[repr(i32)]
pub enum ContainerError {
    #[error("internal error")]
    InternalError = -99000,
    #[error("operation not supported by this container")]
    InvalidVirtualCall = -99001,
}

impl ContainerError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn kind(self) -> StorageErrorKind {
        StorageErrorKind::Internal
    }
}
